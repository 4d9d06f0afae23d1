//! Queue Store
//!
//! Named FIFOs of JSON-encoded items shared by every process. Correctness of
//! multi-process consumption rests on `pop_batch` being atomic: each item is
//! handed to exactly one consumer.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::shared::error::AppError;

/// FIFO storage for queue items.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Append an item to the tail.
    async fn push(&self, queue: &str, item: String) -> Result<(), AppError>;

    /// Pop up to `max` items from the head, oldest first.
    async fn pop_batch(&self, queue: &str, max: usize) -> Result<Vec<String>, AppError>;

    async fn len(&self, queue: &str) -> Result<usize, AppError>;

    async fn clear(&self, queue: &str) -> Result<(), AppError>;

    /// Park until something is pushed or `timeout` elapses.
    async fn wait_for_push(&self, queue: &str, timeout: Duration);
}

/// Redis list-backed queue store.
///
/// Requires Redis 6.2+ for `LPOP key count`.
#[derive(Clone)]
pub struct RedisQueueStore {
    redis: ConnectionManager,
}

impl RedisQueueStore {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl QueueStore for RedisQueueStore {
    async fn push(&self, queue: &str, item: String) -> Result<(), AppError> {
        let mut conn = self.redis.clone();
        conn.rpush::<_, _, ()>(queue, item).await?;
        Ok(())
    }

    async fn pop_batch(&self, queue: &str, max: usize) -> Result<Vec<String>, AppError> {
        if max == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.redis.clone();
        let items: Option<Vec<String>> = redis::cmd("LPOP")
            .arg(queue)
            .arg(max)
            .query_async(&mut conn)
            .await?;
        Ok(items.unwrap_or_default())
    }

    async fn len(&self, queue: &str) -> Result<usize, AppError> {
        let mut conn = self.redis.clone();
        let len: usize = conn.llen(queue).await?;
        Ok(len)
    }

    async fn clear(&self, queue: &str) -> Result<(), AppError> {
        let mut conn = self.redis.clone();
        conn.del::<_, ()>(queue).await?;
        Ok(())
    }

    /// Lists offer no cheap push notification, so this is the polling tick.
    async fn wait_for_push(&self, _queue: &str, timeout: Duration) {
        tokio::time::sleep(timeout).await;
    }
}
