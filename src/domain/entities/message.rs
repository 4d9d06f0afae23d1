//! Message entities and repository trait.
//!
//! Maps to the `messages` and `message_read_receipts` tables in the database
//! schema. The optimistic copy broadcast before persistence lives here too,
//! since clients reconcile the two by `tempId`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::queue::QueuedMessage;
use crate::domain::Snowflake;
use crate::shared::error::AppError;

/// Maximum message length in characters.
pub const MAX_CONTENT_LENGTH: usize = 4000;

/// A durably stored message.
///
/// Maps to the `messages` table:
/// - id: BIGINT PRIMARY KEY (Snowflake ID)
/// - room_id: BIGINT NOT NULL REFERENCES rooms(id)
/// - user_id: BIGINT NOT NULL
/// - content: TEXT NOT NULL (max 4000 characters)
/// - reply_to_id: BIGINT NULL REFERENCES messages(id)
/// - edited: BOOLEAN NOT NULL DEFAULT FALSE
/// - deleted: BOOLEAN NOT NULL DEFAULT FALSE
/// - created_at / updated_at: TIMESTAMPTZ NOT NULL DEFAULT NOW()
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedMessage {
    pub id: Snowflake,
    pub room_id: Snowflake,
    pub user_id: Snowflake,
    pub content: String,
    pub reply_to_id: Option<Snowflake>,
    pub edited: bool,
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert payload for a new message.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub id: Snowflake,
    pub room_id: Snowflake,
    pub user_id: Snowflake,
    pub content: String,
    pub reply_to_id: Option<Snowflake>,
}

impl NewMessage {
    /// Insert payload for a queued message under a freshly minted id.
    pub fn from_queued(id: Snowflake, queued: &QueuedMessage) -> Self {
        Self {
            id,
            room_id: queued.room_id,
            user_id: queued.user_id,
            content: queued.content.clone(),
            reply_to_id: queued.reply_to_id,
        }
    }
}

/// Message rendered to room occupants before it is persisted.
///
/// `id` carries the temporary id until the confirmed copy replaces it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimisticMessage {
    pub id: String,
    pub temp_id: String,
    pub room_id: Snowflake,
    pub user_id: Snowflake,
    pub username: String,
    pub content: String,
    pub reply_to_id: Option<Snowflake>,
    pub created_at: DateTime<Utc>,
    pub pending: bool,
}

impl OptimisticMessage {
    pub fn from_queued(queued: &QueuedMessage, username: &str) -> Self {
        Self {
            id: queued.temp_id.clone(),
            temp_id: queued.temp_id.clone(),
            room_id: queued.room_id,
            user_id: queued.user_id,
            username: username.to_string(),
            content: queued.content.clone(),
            reply_to_id: queued.reply_to_id,
            created_at: queued.enqueued_at,
            pending: true,
        }
    }
}

/// Repository trait for message data access.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// Find a message by its Snowflake ID.
    async fn find_by_id(&self, id: Snowflake) -> Result<Option<PersistedMessage>, AppError>;

    /// Find a non-deleted message in the given room (reply target lookup).
    async fn find_live_in_room(
        &self,
        id: Snowflake,
        room_id: Snowflake,
    ) -> Result<Option<PersistedMessage>, AppError>;

    /// Insert a message, returning the durable record.
    async fn create(&self, message: &NewMessage) -> Result<PersistedMessage, AppError>;

    /// Upsert a read receipt, returning the read timestamp.
    async fn mark_read(&self, message_id: Snowflake, user_id: Snowflake) -> Result<DateTime<Utc>, AppError>;
}
