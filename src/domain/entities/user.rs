//! User identity and presence status.
//!
//! Accounts themselves live in an external service; the delivery core only
//! ever sees the identity carried by a verified token.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::Snowflake;

/// User status as broadcast in `user_status_changed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserStatus {
    #[default]
    Offline,
    Online,
    Idle,
    DoNotDisturb,
}

impl UserStatus {
    /// Parse a status, accepting any casing. Unknown values are rejected.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "ONLINE" => Some(Self::Online),
            "IDLE" => Some(Self::Idle),
            "DO_NOT_DISTURB" | "DND" => Some(Self::DoNotDisturb),
            "OFFLINE" => Some(Self::Offline),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Offline => "OFFLINE",
            Self::Online => "ONLINE",
            Self::Idle => "IDLE",
            Self::DoNotDisturb => "DO_NOT_DISTURB",
        }
    }
}

impl std::fmt::Display for UserStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Identity bound to a connection after a successful `authenticate`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Snowflake,
    pub username: String,
}

/// Presence change fanned out to every gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChange {
    pub user_id: Snowflake,
    pub username: String,
    pub status: UserStatus,
    pub timestamp: DateTime<Utc>,
}

impl StatusChange {
    pub fn now(identity: &Identity, status: UserStatus) -> Self {
        Self {
            user_id: identity.user_id,
            username: identity.username.clone(),
            status,
            timestamp: Utc::now(),
        }
    }
}
