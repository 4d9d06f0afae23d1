//! Middleware
//!
//! Tower layers applied to the whole router.

pub mod cors;
pub mod logging;

pub use cors::create_cors_layer;
pub use logging::create_trace_layer;
