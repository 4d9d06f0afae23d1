//! Room entity and repository trait.
//!
//! Maps to the `rooms` table in the database schema.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::Snowflake;
use crate::shared::error::AppError;

/// Room kind, derived from the `is_direct` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RoomKind {
    /// A named room with any number of members
    #[default]
    Group,
    /// A one-to-one conversation
    Direct,
}

/// Represents a chat room.
///
/// Maps to the `rooms` table:
/// - id: BIGINT PRIMARY KEY (Snowflake ID)
/// - name: VARCHAR(100) NOT NULL
/// - is_private: BOOLEAN NOT NULL DEFAULT FALSE
/// - is_direct: BOOLEAN NOT NULL DEFAULT FALSE
/// - created_at: TIMESTAMPTZ NOT NULL DEFAULT NOW()
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: Snowflake,
    pub name: String,
    /// Private rooms are joinable by invitation only
    pub is_private: bool,
    pub is_direct: bool,
    pub created_at: DateTime<Utc>,
}

impl Room {
    pub fn kind(&self) -> RoomKind {
        if self.is_direct {
            RoomKind::Direct
        } else {
            RoomKind::Group
        }
    }

    /// Whether a user without an existing membership may join on their own.
    pub fn is_self_joinable(&self) -> bool {
        !self.is_private && !self.is_direct
    }
}

/// Repository trait for Room lookups.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RoomRepository: Send + Sync {
    /// Find a room by its Snowflake ID.
    async fn find_by_id(&self, id: Snowflake) -> Result<Option<Room>, AppError>;
}
