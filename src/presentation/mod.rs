//! Presentation Layer
//!
//! WebSocket gateway, health and metrics routes.

pub mod http;
pub mod middleware;
pub mod websocket;
