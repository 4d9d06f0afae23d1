//! Coordination Module
//!
//! The shared store every process coordinates through: presence, queue
//! FIFOs and the fan-out bus.
//!
//! This module provides:
//! - Redis connection management with automatic reconnection
//! - `PresenceStore`, `QueueStore` and `FanoutBus` traits
//! - Redis implementations and in-memory (local-only) fallbacks
//! - Predefined key names for consistent Redis key naming
//!
//! # Architecture
//!
//! ```text
//! +-------------------+      +-------------------+
//! |     Gateway       |      |   Queue workers   |
//! +-------------------+      +-------------------+
//!          |                          |
//!          v                          v
//! +--------------------------------------------+
//! |  PresenceStore / QueueStore / FanoutBus    |  <-- injected handles
//! +--------------------------------------------+
//!          |                          |
//!          v                          v
//! +-------------------+      +-------------------+
//! | ConnectionManager |      |  Memory fallback  |
//! +-------------------+      +-------------------+
//! ```

mod bus;
mod memory;
mod presence;
mod queue_store;

pub use bus::{FanoutBus, LocalBus, RedisFanoutBus, BUS_CAPACITY};
pub use memory::{MemoryPresenceStore, MemoryQueueStore};
pub use presence::{PresenceStore, RedisPresenceStore};
pub use queue_store::{QueueStore, RedisQueueStore};

use std::sync::Arc;
use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::Client;
use tracing::{info, instrument, warn};

use crate::config::RedisSettings;
use crate::infrastructure::metrics;

/// Creates a Redis client and a connection manager with automatic reconnection.
#[instrument(skip(settings))]
pub async fn create_redis_client(
    settings: &RedisSettings,
) -> Result<(Client, ConnectionManager), redis::RedisError> {
    info!("Connecting to Redis...");
    let client = Client::open(settings.url.as_str())?;
    let manager = ConnectionManager::new(client.clone()).await?;
    info!("Redis connection established");
    Ok((client, manager))
}

/// Redis key and queue names.
pub mod keys {
    /// Prefix for the user's connection id (e.g., "presence:user_id")
    pub const USER_PRESENCE: &str = "presence:";

    /// Prefix for the set of rooms a user occupies
    pub const USER_ROOMS: &str = "user_rooms:";

    /// Pub/sub channel of the fan-out bus
    pub const BUS_CHANNEL: &str = "realtime_chat:events";

    pub const MESSAGE_QUEUE: &str = "message_queue";
    pub const ROOM_JOIN_QUEUE: &str = "room_join_queue";
    pub const ROOM_LEAVE_QUEUE: &str = "room_leave_queue";

    #[inline]
    pub fn presence(user_id: impl std::fmt::Display) -> String {
        format!("{}{}", USER_PRESENCE, user_id)
    }

    #[inline]
    pub fn user_rooms(user_id: impl std::fmt::Display) -> String {
        format!("{}{}", USER_ROOMS, user_id)
    }
}

/// Injected coordination handles.
#[derive(Clone)]
pub struct Coordination {
    pub presence: Arc<dyn PresenceStore>,
    pub queues: Arc<dyn QueueStore>,
    pub bus: Arc<dyn FanoutBus>,
    /// Started without Redis; presence and fan-out are local-only
    pub local_only: bool,
}

impl Coordination {
    /// Process-local backends.
    pub fn in_memory(presence_ttl: Duration) -> Self {
        Self {
            presence: Arc::new(MemoryPresenceStore::new(presence_ttl)),
            queues: Arc::new(MemoryQueueStore::new()),
            bus: Arc::new(LocalBus::new()),
            local_only: true,
        }
    }

    /// Connect to Redis, falling back to local-only backends when it is
    /// unreachable.
    pub async fn connect(settings: &RedisSettings, presence_ttl: Duration) -> Self {
        match create_redis_client(settings).await {
            Ok((client, manager)) => {
                metrics::set_degraded(false);
                Self {
                    presence: Arc::new(RedisPresenceStore::new(manager.clone(), presence_ttl.as_secs())),
                    queues: Arc::new(RedisQueueStore::new(manager.clone())),
                    bus: RedisFanoutBus::start(client, manager, keys::BUS_CHANNEL),
                    local_only: false,
                }
            }
            Err(e) => {
                warn!(
                    error = %e,
                    "Redis unreachable, running in degraded local-only mode: \
                     presence and fan-out will not reach other processes"
                );
                metrics::set_degraded(true);
                Self::in_memory(presence_ttl)
            }
        }
    }

    /// Whether cross-process delivery is currently unavailable.
    pub fn is_degraded(&self) -> bool {
        self.local_only || self.bus.is_degraded()
    }
}
