//! Fan-out Bus
//!
//! Publish/subscribe transport between gateway processes. Subscribers consume
//! a typed [`broadcast`] stream of [`BusEvent`]s; the Redis implementation
//! forwards one pub/sub channel into that stream.
//!
//! When Redis is unreachable the bus degrades to local-only delivery: events
//! still reach subscribers in this process, other processes miss them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::events::BusEvent;
use crate::infrastructure::metrics;
use crate::shared::error::AppError;

/// Per-subscriber buffer. Slow subscribers lose the oldest events.
pub const BUS_CAPACITY: usize = 1024;

const MAX_RECONNECT_BACKOFF: Duration = Duration::from_secs(30);

/// Cross-process event transport.
#[async_trait]
pub trait FanoutBus: Send + Sync {
    /// Publish an event to every subscribing process, this one included.
    ///
    /// Never fails: transport errors degrade to local delivery.
    async fn publish(&self, event: BusEvent);

    fn subscribe(&self) -> broadcast::Receiver<BusEvent>;

    async fn ping(&self) -> Result<(), AppError>;

    /// Whether delivery is currently local-only.
    fn is_degraded(&self) -> bool;
}

/// In-process bus for single-node deployments and tests.
pub struct LocalBus {
    sender: broadcast::Sender<BusEvent>,
}

impl LocalBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BUS_CAPACITY);
        Self { sender }
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FanoutBus for LocalBus {
    async fn publish(&self, event: BusEvent) {
        metrics::record_bus_event(event.topic(), "published");
        // no receivers is fine
        let _ = self.sender.send(event);
    }

    fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.sender.subscribe()
    }

    async fn ping(&self) -> Result<(), AppError> {
        Ok(())
    }

    fn is_degraded(&self) -> bool {
        false
    }
}

/// Tracks the local-only transition so it is logged once, not per event.
#[derive(Default)]
struct DegradedFlag(AtomicBool);

impl DegradedFlag {
    fn enter(&self, reason: &str) {
        if !self.0.swap(true, Ordering::AcqRel) {
            warn!(reason, "Fan-out bus degraded to local-only delivery");
            metrics::set_degraded(true);
        }
    }

    fn leave(&self) {
        if self.0.swap(false, Ordering::AcqRel) {
            info!("Fan-out bus recovered, cross-process delivery restored");
            metrics::set_degraded(false);
        }
    }

    fn get(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Redis pub/sub-backed bus.
pub struct RedisFanoutBus {
    redis: ConnectionManager,
    channel: String,
    local: broadcast::Sender<BusEvent>,
    subscribed: Arc<AtomicBool>,
    degraded: Arc<DegradedFlag>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl RedisFanoutBus {
    /// Create the bus and start the subscriber task.
    pub fn start(client: redis::Client, redis: ConnectionManager, channel: &str) -> Arc<Self> {
        let (local, _) = broadcast::channel(BUS_CAPACITY);
        let bus = Arc::new(Self {
            redis,
            channel: channel.to_string(),
            local,
            subscribed: Arc::new(AtomicBool::new(false)),
            degraded: Arc::new(DegradedFlag::default()),
            listener: Mutex::new(None),
        });

        let handle = tokio::spawn(subscribe_loop(
            client,
            bus.channel.clone(),
            bus.local.clone(),
            bus.subscribed.clone(),
            bus.degraded.clone(),
        ));
        *bus.listener.lock() = Some(handle);

        bus
    }

    fn deliver_locally(&self, event: BusEvent) {
        let _ = self.local.send(event);
    }
}

impl Drop for RedisFanoutBus {
    fn drop(&mut self) {
        if let Some(handle) = self.listener.lock().take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl FanoutBus for RedisFanoutBus {
    async fn publish(&self, event: BusEvent) {
        let topic = event.topic();
        let payload = match serde_json::to_string(&event) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(topic, error = %e, "Failed to encode bus event, delivering locally");
                self.deliver_locally(event);
                return;
            }
        };

        let mut conn = self.redis.clone();
        let published = match conn.publish::<_, _, i64>(&self.channel, payload).await {
            Ok(_) => true,
            Err(e) => {
                self.degraded.enter(&e.to_string());
                false
            }
        };
        metrics::record_bus_event(topic, "published");

        // Our own subscription echoes successful publishes back to us
        if !published || !self.subscribed.load(Ordering::Acquire) {
            self.deliver_locally(event);
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.local.subscribe()
    }

    async fn ping(&self) -> Result<(), AppError> {
        if !self.subscribed.load(Ordering::Acquire) {
            return Err(AppError::BusUnavailable("not subscribed".into()));
        }
        let mut conn = self.redis.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    fn is_degraded(&self) -> bool {
        self.degraded.get()
    }
}

/// Forward the pub/sub channel into the local stream, reconnecting with
/// exponential backoff whenever the subscription drops.
async fn subscribe_loop(
    client: redis::Client,
    channel: String,
    local: broadcast::Sender<BusEvent>,
    subscribed: Arc<AtomicBool>,
    degraded: Arc<DegradedFlag>,
) {
    let mut backoff = Duration::from_millis(250);

    loop {
        match client.get_async_pubsub().await {
            Ok(mut pubsub) => match pubsub.subscribe(&channel).await {
                Ok(()) => {
                    info!(channel = %channel, "Subscribed to fan-out channel");
                    subscribed.store(true, Ordering::Release);
                    degraded.leave();
                    backoff = Duration::from_millis(250);

                    let mut messages = Box::pin(pubsub.into_on_message());
                    while let Some(msg) = messages.next().await {
                        let payload: String = match msg.get_payload() {
                            Ok(payload) => payload,
                            Err(e) => {
                                warn!(error = %e, "Unreadable bus payload");
                                continue;
                            }
                        };
                        match serde_json::from_str::<BusEvent>(&payload) {
                            Ok(event) => {
                                debug!(topic = event.topic(), "Bus event received");
                                metrics::record_bus_event(event.topic(), "received");
                                let _ = local.send(event);
                            }
                            Err(e) => warn!(error = %e, "Discarding malformed bus event"),
                        }
                    }

                    subscribed.store(false, Ordering::Release);
                    degraded.enter("subscription closed");
                }
                Err(e) => degraded.enter(&e.to_string()),
            },
            Err(e) => degraded.enter(&e.to_string()),
        }

        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(MAX_RECONNECT_BACKOFF);
    }
}
