//! Application Services
//!
//! - **TokenVerifier**: bearer token verification for the gateway handshake
//! - **MessageService**: persistence-time checks, message storage, read receipts

pub mod auth_service;
pub mod message_service;

pub use auth_service::{AuthError, Claims, TokenVerifier};
pub use message_service::{validate_content, MessageService};
