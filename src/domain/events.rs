//! Events carried by the fan-out bus.
//!
//! Every gateway process subscribes to the bus and re-emits these events to
//! its own live connections. Handlers must tolerate redelivery.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::entities::{MembershipOutcome, OptimisticMessage, PersistedMessage, StatusChange};
use crate::domain::Snowflake;

/// Events scoped to the occupants of one room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum RoomEvent {
    NewMessage(OptimisticMessage),
    UserJoinedRoom {
        user_id: Snowflake,
        username: String,
        room_id: Snowflake,
    },
    UserLeftRoom {
        user_id: Snowflake,
        username: String,
        room_id: Snowflake,
    },
    UserTyping {
        user_id: Snowflake,
        username: String,
        room_id: Snowflake,
        is_typing: bool,
    },
    MessageRead {
        message_id: Snowflake,
        user_id: Snowflake,
        username: String,
        read_at: DateTime<Utc>,
    },
}

/// A room event relayed between gateways.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomBroadcast {
    /// Gateway instance that already delivered the event locally
    pub origin: Uuid,
    pub room_id: Snowflake,
    /// Occupant that must not receive the event (typically its author)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_user: Option<Snowflake>,
    pub event: RoomEvent,
}

/// Durable copy of a queued message, keyed by its temporary id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePersisted {
    pub temp_id: String,
    pub message: PersistedMessage,
}

/// A queued message that will never be persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDropped {
    pub temp_id: String,
    pub room_id: Snowflake,
    pub user_id: Snowflake,
    pub reason: String,
}

/// Bus envelope. The tag doubles as the topic name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "topic", content = "payload", rename_all = "snake_case")]
pub enum BusEvent {
    UserStatusChanged(StatusChange),
    RoomEvent(RoomBroadcast),
    #[serde(rename = "message_saved")]
    MessagePersisted(MessagePersisted),
    MessageDropped(MessageDropped),
    RoomJoinProcessed(MembershipOutcome),
    RoomLeaveProcessed(MembershipOutcome),
}

impl BusEvent {
    /// Topic name, used for logging and metric labels.
    pub fn topic(&self) -> &'static str {
        match self {
            Self::UserStatusChanged(_) => "user_status_changed",
            Self::RoomEvent(_) => "room_event",
            Self::MessagePersisted(_) => "message_saved",
            Self::MessageDropped(_) => "message_dropped",
            Self::RoomJoinProcessed(_) => "room_join_processed",
            Self::RoomLeaveProcessed(_) => "room_leave_processed",
        }
    }
}
