//! # Domain Entities
//!
//! Core domain entities of the delivery core. Durable entities map directly
//! to their database tables; queue items live in the coordination store.
//!
//! - **Room**: a conversation space, group or direct
//! - **Membership**: a user's (unique) membership in a room
//! - **Message**: persisted and optimistic messages
//! - **Queue items**: queued messages and membership requests with outcomes
//! - **User**: identity bound to a connection and presence status
//!
//! Repository traits are implemented in the infrastructure layer.

mod member;
mod message;
mod queue;
mod room;
mod user;

pub use member::{Membership, MembershipRepository, RoomRole};
pub use message::{
    MessageRepository, NewMessage, OptimisticMessage, PersistedMessage, MAX_CONTENT_LENGTH,
};
pub use queue::{
    new_temp_id, MembershipOutcome, MembershipRequest, MutationState, QueuedMessage,
    RoomJoinRequest, RoomLeaveRequest,
};
pub use room::{Room, RoomKind, RoomRepository};
pub use user::{Identity, StatusChange, UserStatus};

#[cfg(test)]
pub use member::MockMembershipRepository;
#[cfg(test)]
pub use message::MockMessageRepository;
#[cfg(test)]
pub use room::MockRoomRepository;
