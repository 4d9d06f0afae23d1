//! Membership Repository Implementation
//!
//! PostgreSQL implementation of the MembershipRepository trait.
//! Handles room membership rows and ban lookups.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::domain::{Membership, MembershipRepository, RoomRole, Snowflake};
use crate::shared::error::AppError;

/// Database row representation matching the room_members table schema.
#[derive(Debug, sqlx::FromRow)]
struct MembershipRow {
    room_id: i64,
    user_id: i64,
    role: String,
    muted_until: Option<DateTime<Utc>>,
    joined_at: DateTime<Utc>,
}

impl MembershipRow {
    fn into_membership(self) -> Membership {
        Membership {
            room_id: Snowflake::new(self.room_id),
            user_id: Snowflake::new(self.user_id),
            role: RoomRole::from_db(&self.role),
            muted_until: self.muted_until,
            joined_at: self.joined_at,
        }
    }
}

/// PostgreSQL membership repository implementation.
#[derive(Clone)]
pub struct PgMembershipRepository {
    pool: PgPool,
}

impl PgMembershipRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MembershipRepository for PgMembershipRepository {
    async fn find(&self, user_id: Snowflake, room_id: Snowflake) -> Result<Option<Membership>, AppError> {
        let row = sqlx::query_as::<_, MembershipRow>(
            r#"
            SELECT room_id, user_id, role, muted_until, joined_at
            FROM room_members
            WHERE room_id = $1 AND user_id = $2
            "#,
        )
        .bind(room_id.as_i64())
        .bind(user_id.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(MembershipRow::into_membership))
    }

    async fn find_room_ids_by_user(&self, user_id: Snowflake) -> Result<Vec<Snowflake>, AppError> {
        let ids = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT room_id FROM room_members
            WHERE user_id = $1
            ORDER BY joined_at ASC
            "#,
        )
        .bind(user_id.as_i64())
        .fetch_all(&self.pool)
        .await?;

        Ok(ids.into_iter().map(Snowflake::new).collect())
    }

    /// Insert a membership.
    ///
    /// The composite primary key makes concurrent joins for the same pair
    /// collapse into one row; the loser sees `false`.
    async fn insert(&self, membership: &Membership) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO room_members (room_id, user_id, role, muted_until, joined_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (room_id, user_id) DO NOTHING
            "#,
        )
        .bind(membership.room_id.as_i64())
        .bind(membership.user_id.as_i64())
        .bind(membership.role.as_str())
        .bind(membership.muted_until)
        .bind(membership.joined_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, user_id: Snowflake, room_id: Snowflake) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            DELETE FROM room_members
            WHERE room_id = $1 AND user_id = $2
            "#,
        )
        .bind(room_id.as_i64())
        .bind(user_id.as_i64())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn is_banned(&self, user_id: Snowflake, room_id: Snowflake) -> Result<bool, AppError> {
        let banned = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM room_bans
                WHERE room_id = $1 AND user_id = $2
            )
            "#,
        )
        .bind(room_id.as_i64())
        .bind(user_id.as_i64())
        .fetch_one(&self.pool)
        .await?;

        Ok(banned)
    }
}
