//! In-memory coordination backends.
//!
//! Used when Redis is unreachable (local-only mode) and by tests. Semantics
//! match the Redis implementations, including presence expiry.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::presence::PresenceStore;
use super::queue_store::QueueStore;
use crate::domain::Snowflake;
use crate::shared::error::AppError;

#[derive(Debug, Clone)]
struct Expiring<T> {
    value: T,
    expires_at: Instant,
}

impl<T> Expiring<T> {
    fn new(value: T, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_live(&self) -> bool {
        self.expires_at > Instant::now()
    }
}

/// Process-local presence store with the same expiry rules as Redis.
pub struct MemoryPresenceStore {
    ttl: Duration,
    connections: DashMap<Snowflake, Expiring<String>>,
    user_rooms: DashMap<Snowflake, Expiring<HashSet<Snowflake>>>,
}

impl MemoryPresenceStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            connections: DashMap::new(),
            user_rooms: DashMap::new(),
        }
    }

}

#[async_trait]
impl PresenceStore for MemoryPresenceStore {
    async fn set_connected(&self, user_id: Snowflake, connection_id: &str) -> Result<(), AppError> {
        self.connections
            .insert(user_id, Expiring::new(connection_id.to_string(), self.ttl));
        Ok(())
    }

    async fn clear_connected(&self, user_id: Snowflake, connection_id: &str) -> Result<bool, AppError> {
        Ok(self
            .connections
            .remove_if(&user_id, |_, entry| entry.value == connection_id)
            .is_some())
    }

    async fn connection_of(&self, user_id: Snowflake) -> Result<Option<String>, AppError> {
        Ok(self
            .connections
            .get(&user_id)
            .filter(|entry| entry.is_live())
            .map(|entry| entry.value.clone()))
    }

    async fn add_to_room(&self, user_id: Snowflake, room_id: Snowflake) -> Result<(), AppError> {
        let mut entry = self
            .user_rooms
            .entry(user_id)
            .or_insert_with(|| Expiring::new(HashSet::new(), self.ttl));
        if !entry.is_live() {
            entry.value.clear();
        }
        entry.value.insert(room_id);
        entry.expires_at = Instant::now() + self.ttl;
        Ok(())
    }

    async fn remove_from_room(&self, user_id: Snowflake, room_id: Snowflake) -> Result<(), AppError> {
        if let Some(mut entry) = self.user_rooms.get_mut(&user_id) {
            entry.value.remove(&room_id);
        }
        self.user_rooms
            .remove_if(&user_id, |_, entry| entry.value.is_empty() || !entry.is_live());
        Ok(())
    }

    async fn rooms_of(&self, user_id: Snowflake) -> Result<Vec<Snowflake>, AppError> {
        Ok(self
            .user_rooms
            .get(&user_id)
            .filter(|entry| entry.is_live())
            .map(|entry| entry.value.iter().copied().collect())
            .unwrap_or_default())
    }

    async fn is_in_room(&self, user_id: Snowflake, room_id: Snowflake) -> Result<bool, AppError> {
        Ok(self
            .user_rooms
            .get(&user_id)
            .is_some_and(|entry| entry.is_live() && entry.value.contains(&room_id)))
    }

    async fn clear_rooms(&self, user_id: Snowflake) -> Result<(), AppError> {
        self.user_rooms.remove(&user_id);
        Ok(())
    }

    async fn refresh(&self, user_id: Snowflake) -> Result<(), AppError> {
        let deadline = Instant::now() + self.ttl;
        if let Some(mut entry) = self.connections.get_mut(&user_id) {
            entry.expires_at = deadline;
        }
        if let Some(mut entry) = self.user_rooms.get_mut(&user_id) {
            entry.expires_at = deadline;
        }
        Ok(())
    }

    async fn ping(&self) -> Result<(), AppError> {
        Ok(())
    }
}

/// Process-local FIFOs with push notification.
#[derive(Default)]
pub struct MemoryQueueStore {
    queues: Mutex<HashMap<String, VecDeque<String>>>,
    signals: DashMap<String, Arc<Notify>>,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn signal(&self, queue: &str) -> Arc<Notify> {
        self.signals
            .entry(queue.to_string())
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn push(&self, queue: &str, item: String) -> Result<(), AppError> {
        self.queues
            .lock()
            .entry(queue.to_string())
            .or_default()
            .push_back(item);
        // stores a permit when nobody is waiting yet
        self.signal(queue).notify_one();
        Ok(())
    }

    async fn pop_batch(&self, queue: &str, max: usize) -> Result<Vec<String>, AppError> {
        let mut queues = self.queues.lock();
        let Some(items) = queues.get_mut(queue) else {
            return Ok(Vec::new());
        };
        let take = max.min(items.len());
        Ok(items.drain(..take).collect())
    }

    async fn len(&self, queue: &str) -> Result<usize, AppError> {
        Ok(self.queues.lock().get(queue).map_or(0, VecDeque::len))
    }

    async fn clear(&self, queue: &str) -> Result<(), AppError> {
        self.queues.lock().remove(queue);
        Ok(())
    }

    async fn wait_for_push(&self, queue: &str, timeout: Duration) {
        let signal = self.signal(queue);
        let _ = tokio::time::timeout(timeout, signal.notified()).await;
    }
}
