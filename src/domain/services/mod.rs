//! # Domain Services
//!
//! Pure business rules that don't belong to a single entity.
//!
//! - **reconciliation**: folding optimistic, confirmed and failed deliveries
//!   of a message into one timeline entry per `tempId`

mod reconciliation;

pub use reconciliation::*;
