//! Application Layer
//!
//! Orchestrates the domain against the durable and coordination stores:
//! token verification, message persistence and the two queue workers that
//! sit between the gateway and the database.

pub mod queues;
pub mod services;
