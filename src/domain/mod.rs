//! # Domain Layer
//!
//! The domain layer contains the core rules of the delivery core.
//! It is independent of any external frameworks or infrastructure concerns.
//!
//! ## Structure
//!
//! - **entities**: Rooms, memberships, messages, queue items and identities
//! - **value_objects**: Immutable value types (Snowflake)
//! - **events**: Fan-out bus envelope and room events
//! - **services**: Pure domain logic (delivery reconciliation)
//!
//! Repository traits define the durable store contracts; implementations live
//! in the infrastructure layer.

pub mod entities;
pub mod events;
pub mod services;
pub mod value_objects;

// Re-export commonly used types
pub use entities::*;
pub use value_objects::*;
