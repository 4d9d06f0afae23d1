//! Message Service
//!
//! Persistence-time validation and storage of queued messages, plus read
//! receipts. Access is re-checked here because membership may have changed
//! between enqueue and persistence.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::instrument;

use crate::domain::{
    MembershipRepository, MessageRepository, NewMessage, PersistedMessage, QueuedMessage,
    Snowflake, MAX_CONTENT_LENGTH,
};
use crate::shared::error::AppError;
use crate::shared::snowflake::SnowflakeGenerator;

pub struct MessageService {
    messages: Arc<dyn MessageRepository>,
    memberships: Arc<dyn MembershipRepository>,
    id_generator: Arc<SnowflakeGenerator>,
}

impl MessageService {
    pub fn new(
        messages: Arc<dyn MessageRepository>,
        memberships: Arc<dyn MembershipRepository>,
        id_generator: Arc<SnowflakeGenerator>,
    ) -> Self {
        Self {
            messages,
            memberships,
            id_generator,
        }
    }

    /// Validate and store a queued message.
    ///
    /// Checks, in order: content length, membership, ban, mute, reply target.
    #[instrument(skip(self, queued), fields(temp_id = %queued.temp_id, user_id = %queued.user_id, room_id = %queued.room_id))]
    pub async fn persist(&self, queued: &QueuedMessage) -> Result<PersistedMessage, AppError> {
        validate_content(&queued.content)?;

        let membership = self
            .memberships
            .find(queued.user_id, queued.room_id)
            .await?
            .ok_or_else(|| AppError::AccessDenied("You are not a member of this room".into()))?;

        if self.memberships.is_banned(queued.user_id, queued.room_id).await? {
            return Err(AppError::AccessDenied("You are banned from this room".into()));
        }

        if membership.is_muted_at(Utc::now()) {
            return Err(AppError::AccessDenied("You are muted in this room".into()));
        }

        if let Some(reply_to_id) = queued.reply_to_id {
            self.messages
                .find_live_in_room(reply_to_id, queued.room_id)
                .await?
                .ok_or_else(|| AppError::NotFound("Reply target message not found".into()))?;
        }

        let id = self.id_generator.generate();
        self.messages
            .create(&NewMessage::from_queued(id, queued))
            .await
    }

    /// Record that `user_id` has read a message, returning the message and
    /// the read timestamp.
    #[instrument(skip(self))]
    pub async fn mark_as_read(
        &self,
        message_id: Snowflake,
        user_id: Snowflake,
    ) -> Result<(PersistedMessage, DateTime<Utc>), AppError> {
        let message = self
            .messages
            .find_by_id(message_id)
            .await?
            .filter(|m| !m.deleted)
            .ok_or_else(|| AppError::NotFound("Message not found".into()))?;

        self.memberships
            .find(user_id, message.room_id)
            .await?
            .ok_or_else(|| AppError::AccessDenied("You are not a member of this room".into()))?;

        let read_at = self.messages.mark_read(message_id, user_id).await?;
        Ok((message, read_at))
    }
}

/// Content must be 1..=4000 characters and not only whitespace.
pub fn validate_content(content: &str) -> Result<(), AppError> {
    if content.trim().is_empty() {
        return Err(AppError::Validation("Message content cannot be empty".into()));
    }
    if content.chars().count() > MAX_CONTENT_LENGTH {
        return Err(AppError::Validation(format!(
            "Message content cannot exceed {} characters",
            MAX_CONTENT_LENGTH
        )));
    }
    Ok(())
}
