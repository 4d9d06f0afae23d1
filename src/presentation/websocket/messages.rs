//! WebSocket Message Types
//!
//! Every frame is a JSON object `{"event": <name>, "data": <payload>}`.
//! Field names are camelCase; snowflake ids are decimal strings on the way
//! out and accept strings or numbers on the way in.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::domain::events::RoomEvent;
use crate::domain::services::Delivery;
use crate::domain::{OptimisticMessage, PersistedMessage, Snowflake, StatusChange};

/// Client to server events.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ClientEvent {
    Authenticate { token: String },
    JoinRoom { room_id: Snowflake },
    LeaveRoom { room_id: Snowflake },
    SendMessage(SendMessagePayload),
    TypingStart { room_id: Snowflake },
    TypingStop { room_id: Snowflake },
    MarkAsRead { message_id: Snowflake },
    UpdateStatus { status: String },
}

impl ClientEvent {
    /// Event name, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Authenticate { .. } => "authenticate",
            Self::JoinRoom { .. } => "join_room",
            Self::LeaveRoom { .. } => "leave_room",
            Self::SendMessage(_) => "send_message",
            Self::TypingStart { .. } => "typing_start",
            Self::TypingStop { .. } => "typing_stop",
            Self::MarkAsRead { .. } => "mark_as_read",
            Self::UpdateStatus { .. } => "update_status",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    pub room_id: Snowflake,

    #[validate(length(min = 1, max = 4000, message = "Message must be 1-4000 characters"))]
    pub content: String,

    #[serde(default)]
    pub reply_to_id: Option<Snowflake>,
}

/// Server to client events.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    Authenticated {
        success: bool,
        user_id: Snowflake,
        username: String,
    },
    AuthenticationError {
        message: String,
    },
    RoomJoined {
        room_id: Snowflake,
    },
    RoomJoinQueued {
        room_id: Snowflake,
    },
    RoomLeft {
        room_id: Snowflake,
    },
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
    NewMessage(OptimisticMessage),
    MessageConfirmed {
        temp_id: String,
        message: PersistedMessage,
    },
    MessageFailed {
        temp_id: String,
        room_id: Snowflake,
        reason: String,
    },
    MessageRead {
        message_id: Snowflake,
        user_id: Snowflake,
        username: String,
        read_at: DateTime<Utc>,
    },
    UserTyping {
        user_id: Snowflake,
        username: String,
        room_id: Snowflake,
        is_typing: bool,
    },
    UserStatusChanged(StatusChange),
    Error {
        message: String,
    },
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// The message delivery carried by this event, if any.
    pub fn delivery(&self) -> Option<Delivery> {
        match self {
            Self::NewMessage(message) => Some(Delivery::Optimistic(message.clone())),
            Self::MessageConfirmed { temp_id, message } => Some(Delivery::Confirmed {
                temp_id: temp_id.clone(),
                message: message.clone(),
            }),
            Self::MessageFailed { temp_id, reason, .. } => Some(Delivery::Failed {
                temp_id: temp_id.clone(),
                reason: reason.clone(),
            }),
            _ => None,
        }
    }
}

impl From<RoomEvent> for ServerEvent {
    fn from(event: RoomEvent) -> Self {
        match event {
            RoomEvent::NewMessage(message) => Self::NewMessage(message),
            RoomEvent::UserJoinedRoom {
                user_id,
                username,
                room_id,
            } => Self::UserJoinedRoom {
                user_id,
                username,
                room_id,
            },
            RoomEvent::UserLeftRoom {
                user_id,
                username,
                room_id,
            } => Self::UserLeftRoom {
                user_id,
                username,
                room_id,
            },
            RoomEvent::UserTyping {
                user_id,
                username,
                room_id,
                is_typing,
            } => Self::UserTyping {
                user_id,
                username,
                room_id,
                is_typing,
            },
            RoomEvent::MessageRead {
                message_id,
                user_id,
                username,
                read_at,
            } => Self::MessageRead {
                message_id,
                user_id,
                username,
                read_at,
            },
        }
    }
}

/// Item on a connection's outbound channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Event(ServerEvent),
    /// Send a close frame and stop writing
    Close,
}
