//! Message Repository Implementation
//!
//! PostgreSQL implementation of the MessageRepository trait.
//! Ids are minted by the caller; the database never generates them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::domain::{MessageRepository, NewMessage, PersistedMessage, Snowflake};
use crate::shared::error::AppError;

/// Database row representation matching the messages table schema.
#[derive(Debug, sqlx::FromRow)]
struct MessageRow {
    id: i64,
    room_id: i64,
    user_id: i64,
    content: String,
    reply_to_id: Option<i64>,
    edited: bool,
    deleted: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl MessageRow {
    fn into_message(self) -> PersistedMessage {
        PersistedMessage {
            id: Snowflake::new(self.id),
            room_id: Snowflake::new(self.room_id),
            user_id: Snowflake::new(self.user_id),
            content: self.content,
            reply_to_id: self.reply_to_id.map(Snowflake::new),
            edited: self.edited,
            deleted: self.deleted,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// PostgreSQL message repository implementation.
#[derive(Clone)]
pub struct PgMessageRepository {
    pool: PgPool,
}

impl PgMessageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageRepository for PgMessageRepository {
    async fn find_by_id(&self, id: Snowflake) -> Result<Option<PersistedMessage>, AppError> {
        let row = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT id, room_id, user_id, content, reply_to_id,
                   edited, deleted, created_at, updated_at
            FROM messages
            WHERE id = $1
            "#,
        )
        .bind(id.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(MessageRow::into_message))
    }

    async fn find_live_in_room(
        &self,
        id: Snowflake,
        room_id: Snowflake,
    ) -> Result<Option<PersistedMessage>, AppError> {
        let row = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT id, room_id, user_id, content, reply_to_id,
                   edited, deleted, created_at, updated_at
            FROM messages
            WHERE id = $1 AND room_id = $2 AND deleted = FALSE
            "#,
        )
        .bind(id.as_i64())
        .bind(room_id.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(MessageRow::into_message))
    }

    async fn create(&self, message: &NewMessage) -> Result<PersistedMessage, AppError> {
        let row = sqlx::query_as::<_, MessageRow>(
            r#"
            INSERT INTO messages (id, room_id, user_id, content, reply_to_id)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, room_id, user_id, content, reply_to_id,
                      edited, deleted, created_at, updated_at
            "#,
        )
        .bind(message.id.as_i64())
        .bind(message.room_id.as_i64())
        .bind(message.user_id.as_i64())
        .bind(&message.content)
        .bind(message.reply_to_id.map(|id| id.as_i64()))
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into_message())
    }

    /// Upsert a read receipt. Re-reading moves the timestamp forward.
    async fn mark_read(&self, message_id: Snowflake, user_id: Snowflake) -> Result<DateTime<Utc>, AppError> {
        let read_at = sqlx::query_scalar::<_, DateTime<Utc>>(
            r#"
            INSERT INTO message_read_receipts (message_id, user_id, read_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (message_id, user_id) DO UPDATE SET read_at = EXCLUDED.read_at
            RETURNING read_at
            "#,
        )
        .bind(message_id.as_i64())
        .bind(user_id.as_i64())
        .fetch_one(&self.pool)
        .await?;

        Ok(read_at)
    }
}
