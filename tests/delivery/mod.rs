//! End-to-end delivery tests over in-memory stores.

mod gateway_tests;
mod health_tests;
mod message_queue_tests;
