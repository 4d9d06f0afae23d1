//! WebSocket Gateway
//!
//! Real-time delivery over `/gateway`.

pub mod gateway;
pub mod handler;
pub mod messages;
pub mod pending;
pub mod session;

pub use gateway::{Gateway, GatewayDeps};
pub use handler::ws_handler;
pub use messages::{ClientEvent, Outbound, SendMessagePayload, ServerEvent};
pub use pending::PendingTracker;
pub use session::ConnectedSession;
