//! # Domain Value Objects
//!
//! Immutable value types that represent domain concepts without identity.
//!
//! - **Snowflake**: time-ordered 64-bit id used for users, rooms and messages

mod snowflake;

pub use snowflake::*;
