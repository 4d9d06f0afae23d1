//! Room membership entity and repository trait.
//!
//! Maps to the `room_members` and `room_bans` tables in the database schema.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::Snowflake;
use crate::shared::error::AppError;

/// Role of a member inside a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RoomRole {
    Owner,
    Admin,
    #[default]
    Member,
}

impl RoomRole {
    /// Convert from database string representation.
    pub fn from_db(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "owner" => Self::Owner,
            "admin" => Self::Admin,
            _ => Self::Member,
        }
    }

    /// Convert to database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Admin => "admin",
            Self::Member => "member",
        }
    }
}

/// A user's membership in a room.
///
/// Maps to the `room_members` table:
/// - room_id: BIGINT NOT NULL REFERENCES rooms(id) (composite PK)
/// - user_id: BIGINT NOT NULL (composite PK)
/// - role: VARCHAR(16) NOT NULL DEFAULT 'member'
/// - muted_until: TIMESTAMPTZ NULL
/// - joined_at: TIMESTAMPTZ NOT NULL DEFAULT NOW()
///
/// The composite key guarantees at most one row per user and room.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Membership {
    pub room_id: Snowflake,
    pub user_id: Snowflake,
    pub role: RoomRole,
    pub muted_until: Option<DateTime<Utc>>,
    pub joined_at: DateTime<Utc>,
}

impl Membership {
    /// A plain member joining now.
    pub fn new(room_id: Snowflake, user_id: Snowflake) -> Self {
        Self {
            room_id,
            user_id,
            role: RoomRole::Member,
            muted_until: None,
            joined_at: Utc::now(),
        }
    }

    /// Check if the member is muted at `now`.
    pub fn is_muted_at(&self, now: DateTime<Utc>) -> bool {
        self.muted_until.is_some_and(|until| until > now)
    }
}

/// Repository trait for membership data access.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MembershipRepository: Send + Sync {
    /// Find the membership of a user in a room.
    async fn find(&self, user_id: Snowflake, room_id: Snowflake) -> Result<Option<Membership>, AppError>;

    /// All room ids a user is a member of.
    async fn find_room_ids_by_user(&self, user_id: Snowflake) -> Result<Vec<Snowflake>, AppError>;

    /// Insert a membership. Returns `false` when the row already existed.
    async fn insert(&self, membership: &Membership) -> Result<bool, AppError>;

    /// Delete a membership. Returns `false` when there was nothing to delete.
    async fn delete(&self, user_id: Snowflake, room_id: Snowflake) -> Result<bool, AppError>;

    /// Whether the user is banned from the room.
    async fn is_banned(&self, user_id: Snowflake, room_id: Snowflake) -> Result<bool, AppError>;
}
