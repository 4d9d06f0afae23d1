//! Room Repository Implementation
//!
//! PostgreSQL implementation of the RoomRepository trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::domain::{Room, RoomRepository, Snowflake};
use crate::shared::error::AppError;

/// Database row representation matching the rooms table schema.
#[derive(Debug, sqlx::FromRow)]
struct RoomRow {
    id: i64,
    name: String,
    is_private: bool,
    is_direct: bool,
    created_at: DateTime<Utc>,
}

impl From<RoomRow> for Room {
    fn from(row: RoomRow) -> Self {
        Room {
            id: Snowflake::new(row.id),
            name: row.name,
            is_private: row.is_private,
            is_direct: row.is_direct,
            created_at: row.created_at,
        }
    }
}

/// PostgreSQL room repository implementation.
#[derive(Clone)]
pub struct PgRoomRepository {
    pool: PgPool,
}

impl PgRoomRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RoomRepository for PgRoomRepository {
    async fn find_by_id(&self, id: Snowflake) -> Result<Option<Room>, AppError> {
        let row = sqlx::query_as::<_, RoomRow>(
            r#"
            SELECT id, name, is_private, is_direct, created_at
            FROM rooms
            WHERE id = $1
            "#,
        )
        .bind(id.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Room::from))
    }
}
