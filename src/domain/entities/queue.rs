//! Queue items for message ingestion and room membership changes.
//!
//! These records only exist inside the coordination store's FIFOs and are
//! serialized as JSON there.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::Snowflake;

/// A submitted message waiting to be persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedMessage {
    pub user_id: Snowflake,
    pub room_id: Snowflake,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<Snowflake>,
    /// Correlates the optimistic copy with the persisted one
    pub temp_id: String,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default)]
    pub retries: u32,
}

impl QueuedMessage {
    pub fn new(
        user_id: Snowflake,
        room_id: Snowflake,
        content: String,
        reply_to_id: Option<Snowflake>,
    ) -> Self {
        Self {
            user_id,
            room_id,
            content,
            reply_to_id,
            temp_id: new_temp_id(),
            enqueued_at: Utc::now(),
            retries: 0,
        }
    }

    /// Count a failed persistence attempt and return the new total.
    pub fn record_failure(&mut self) -> u32 {
        self.retries += 1;
        self.retries
    }
}

/// Generate a temporary message id. UUID v7 keeps them time ordered.
pub fn new_temp_id() -> String {
    format!("temp_{}", Uuid::now_v7())
}

/// A join or leave request for a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MembershipRequest {
    pub user_id: Snowflake,
    pub room_id: Snowflake,
    pub username: String,
    /// Connection that issued the request; only its gateway acts on the outcome
    pub connection_id: String,
    pub timestamp: DateTime<Utc>,
}

pub type RoomJoinRequest = MembershipRequest;
pub type RoomLeaveRequest = MembershipRequest;

impl MembershipRequest {
    pub fn new(user_id: Snowflake, room_id: Snowflake, username: &str, connection_id: &str) -> Self {
        Self {
            user_id,
            room_id,
            username: username.to_string(),
            connection_id: connection_id.to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// Lifecycle of a membership mutation. Every enqueued request ends in
/// `Confirmed` or `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationState {
    Requested,
    Processing,
    Confirmed,
    Failed,
}

impl MutationState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Confirmed | Self::Failed)
    }
}

/// Result of a processed join/leave request, published on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MembershipOutcome {
    pub user_id: Snowflake,
    pub room_id: Snowflake,
    pub username: String,
    pub connection_id: String,
    pub state: MutationState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl MembershipOutcome {
    pub fn confirmed(request: &MembershipRequest) -> Self {
        Self::terminal(request, MutationState::Confirmed, None)
    }

    pub fn failed(request: &MembershipRequest, error: impl Into<String>) -> Self {
        Self::terminal(request, MutationState::Failed, Some(error.into()))
    }

    fn terminal(request: &MembershipRequest, state: MutationState, error: Option<String>) -> Self {
        Self {
            user_id: request.user_id,
            room_id: request.room_id,
            username: request.username.clone(),
            connection_id: request.connection_id.clone(),
            state,
            error,
            timestamp: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.state == MutationState::Confirmed
    }
}
