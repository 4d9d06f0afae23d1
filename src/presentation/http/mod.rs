//! HTTP surface: health probes and metrics. The WebSocket upgrade is routed
//! here too.

pub mod handlers;
pub mod routes;

pub use routes::create_router;
