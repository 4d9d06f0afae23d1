//! Presence Store
//!
//! Tracks which connection serves which user and which rooms each user
//! currently occupies. Every key carries a sliding expiry so a crashed
//! gateway cannot leave permanent stale presence behind.
//!
//! Redis layout:
//!
//! ```text
//! presence:{user_id}     STRING  connection id          EX ttl
//! user_rooms:{user_id}   SET     room ids               EXPIRE ttl
//! ```

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use tracing::instrument;

use super::keys;
use crate::domain::Snowflake;
use crate::shared::error::AppError;

/// Compare-and-delete so an old connection never evicts a newer one.
const CLEAR_IF_OWNER: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

/// Shared registry of live users and their rooms.
#[async_trait]
pub trait PresenceStore: Send + Sync {
    /// Bind a user to the connection serving it.
    async fn set_connected(&self, user_id: Snowflake, connection_id: &str) -> Result<(), AppError>;

    /// Remove the user's entry if it still points at `connection_id`.
    ///
    /// Returns `true` when the entry was removed.
    async fn clear_connected(&self, user_id: Snowflake, connection_id: &str) -> Result<bool, AppError>;

    async fn connection_of(&self, user_id: Snowflake) -> Result<Option<String>, AppError>;

    async fn add_to_room(&self, user_id: Snowflake, room_id: Snowflake) -> Result<(), AppError>;

    async fn remove_from_room(&self, user_id: Snowflake, room_id: Snowflake) -> Result<(), AppError>;

    async fn rooms_of(&self, user_id: Snowflake) -> Result<Vec<Snowflake>, AppError>;

    async fn is_in_room(&self, user_id: Snowflake, room_id: Snowflake) -> Result<bool, AppError>;

    /// Drop the user's room set.
    async fn clear_rooms(&self, user_id: Snowflake) -> Result<(), AppError>;

    /// Push the expiry of the user's keys forward.
    async fn refresh(&self, user_id: Snowflake) -> Result<(), AppError>;

    async fn ping(&self) -> Result<(), AppError>;
}

/// Redis-backed presence store.
#[derive(Clone)]
pub struct RedisPresenceStore {
    redis: ConnectionManager,
    ttl_secs: u64,
    clear_script: Script,
}

impl RedisPresenceStore {
    pub fn new(redis: ConnectionManager, ttl_secs: u64) -> Self {
        Self {
            redis,
            ttl_secs,
            clear_script: Script::new(CLEAR_IF_OWNER),
        }
    }

    fn ttl(&self) -> i64 {
        self.ttl_secs as i64
    }
}

#[async_trait]
impl PresenceStore for RedisPresenceStore {
    #[instrument(skip(self), fields(user_id = %user_id))]
    async fn set_connected(&self, user_id: Snowflake, connection_id: &str) -> Result<(), AppError> {
        let mut conn = self.redis.clone();
        conn.set_ex::<_, _, ()>(keys::presence(user_id), connection_id, self.ttl_secs)
            .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    async fn clear_connected(&self, user_id: Snowflake, connection_id: &str) -> Result<bool, AppError> {
        let mut conn = self.redis.clone();
        let removed: i64 = self
            .clear_script
            .key(keys::presence(user_id))
            .arg(connection_id)
            .invoke_async(&mut conn)
            .await?;
        Ok(removed > 0)
    }

    async fn connection_of(&self, user_id: Snowflake) -> Result<Option<String>, AppError> {
        let mut conn = self.redis.clone();
        let value: Option<String> = conn.get(keys::presence(user_id)).await?;
        Ok(value)
    }

    #[instrument(skip(self), fields(user_id = %user_id, room_id = %room_id))]
    async fn add_to_room(&self, user_id: Snowflake, room_id: Snowflake) -> Result<(), AppError> {
        let user_key = keys::user_rooms(user_id);

        let mut conn = self.redis.clone();
        let _: () = redis::pipe()
            .atomic()
            .cmd("SADD").arg(&user_key).arg(room_id.as_i64()).ignore()
            .cmd("EXPIRE").arg(&user_key).arg(self.ttl()).ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(user_id = %user_id, room_id = %room_id))]
    async fn remove_from_room(&self, user_id: Snowflake, room_id: Snowflake) -> Result<(), AppError> {
        let mut conn = self.redis.clone();
        conn.srem::<_, _, ()>(keys::user_rooms(user_id), room_id.as_i64())
            .await?;
        Ok(())
    }

    async fn rooms_of(&self, user_id: Snowflake) -> Result<Vec<Snowflake>, AppError> {
        let mut conn = self.redis.clone();
        let ids: Vec<i64> = conn.smembers(keys::user_rooms(user_id)).await?;
        Ok(ids.into_iter().map(Snowflake::new).collect())
    }

    async fn is_in_room(&self, user_id: Snowflake, room_id: Snowflake) -> Result<bool, AppError> {
        let mut conn = self.redis.clone();
        let member: bool = conn
            .sismember(keys::user_rooms(user_id), room_id.as_i64())
            .await?;
        Ok(member)
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    async fn clear_rooms(&self, user_id: Snowflake) -> Result<(), AppError> {
        let mut conn = self.redis.clone();
        conn.del::<_, ()>(keys::user_rooms(user_id)).await?;
        Ok(())
    }

    async fn refresh(&self, user_id: Snowflake) -> Result<(), AppError> {
        let mut conn = self.redis.clone();
        let _: () = redis::pipe()
            .cmd("EXPIRE").arg(keys::presence(user_id)).arg(self.ttl()).ignore()
            .cmd("EXPIRE").arg(keys::user_rooms(user_id)).arg(self.ttl()).ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), AppError> {
        let mut conn = self.redis.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
