//! Message Queue
//!
//! Ingestion FIFO between the gateway and durable storage. The gateway
//! enqueues; [`MessageQueueWorker`] drains in bounded batches, persists each
//! item and publishes the result on the fan-out bus.
//!
//! Failure handling:
//! - transient failures (store hiccups) are re-pushed to the tail until the
//!   retry ceiling is reached, then dropped
//! - permanent failures (access denied, missing reply target, invalid
//!   content) are dropped immediately
//!
//! Every drop is logged and published as `message_dropped`. A re-pushed item
//! goes behind everything enqueued since, so it may persist after later
//! messages of the same room.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::InFlightGuard;
use crate::application::services::MessageService;
use crate::config::QueueSettings;
use crate::domain::events::{BusEvent, MessageDropped, MessagePersisted};
use crate::domain::QueuedMessage;
use crate::infrastructure::coordination::{keys, FanoutBus, QueueStore};
use crate::infrastructure::metrics;
use crate::shared::error::AppError;

const QUEUE: &str = keys::MESSAGE_QUEUE;

/// Handle for enqueueing messages and inspecting the queue.
#[derive(Clone)]
pub struct MessageQueue {
    store: Arc<dyn QueueStore>,
}

impl MessageQueue {
    pub fn new(store: Arc<dyn QueueStore>) -> Self {
        Self { store }
    }

    pub async fn enqueue(&self, message: &QueuedMessage) -> Result<(), AppError> {
        self.push(message).await?;
        metrics::record_queue_item(QUEUE, "enqueued");
        debug!(temp_id = %message.temp_id, room_id = %message.room_id, "Message enqueued");
        Ok(())
    }

    pub async fn size(&self) -> Result<usize, AppError> {
        self.store.len(QUEUE).await
    }

    /// Discard everything queued. Administrative; queued messages are lost.
    pub async fn clear(&self) -> Result<(), AppError> {
        warn!("Clearing message queue");
        self.store.clear(QUEUE).await
    }

    async fn push(&self, message: &QueuedMessage) -> Result<(), AppError> {
        let item = serde_json::to_string(message)?;
        self.store.push(QUEUE, item).await
    }
}

/// Background worker persisting queued messages.
pub struct MessageQueueWorker {
    queue: MessageQueue,
    service: Arc<MessageService>,
    bus: Arc<dyn FanoutBus>,
    settings: QueueSettings,
    in_flight: AtomicBool,
}

impl MessageQueueWorker {
    pub fn new(
        queue: MessageQueue,
        service: Arc<MessageService>,
        bus: Arc<dyn FanoutBus>,
        settings: QueueSettings,
    ) -> Self {
        Self {
            queue,
            service,
            bus,
            settings,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Drain the queue until shutdown is signalled.
    ///
    /// Batches run back to back while items are available; an empty pop parks
    /// the worker until the next push or the poll interval.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(batch_size = self.settings.batch_size, "Message queue worker started");

        while !*shutdown.borrow() {
            let processed = match self.process_batch().await {
                Ok(n) => n,
                Err(e) => {
                    error!(error = %e, "Failed to pop message batch");
                    0
                }
            };

            if processed == 0 {
                tokio::select! {
                    _ = self.queue.store.wait_for_push(QUEUE, self.settings.poll_interval()) => {}
                    _ = shutdown.changed() => {}
                }
            }
        }

        info!("Message queue worker stopped");
    }

    /// Pop and process one batch, returning the number of items handled.
    ///
    /// Returns `Ok(0)` without popping when a batch is already in flight.
    pub async fn process_batch(&self) -> Result<usize, AppError> {
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight) else {
            return Ok(0);
        };

        let items = self.queue.store.pop_batch(QUEUE, self.settings.batch_size).await?;
        if items.is_empty() {
            return Ok(0);
        }

        let started = Instant::now();
        let count = items.len();
        join_all(items.into_iter().map(|item| self.process_item(item))).await;

        metrics::record_batch_duration(QUEUE, started.elapsed().as_secs_f64());
        debug!(count, "Processed message batch");
        Ok(count)
    }

    async fn process_item(&self, item: String) {
        let mut message: QueuedMessage = match serde_json::from_str(&item) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Discarding unparsable message queue item");
                metrics::record_queue_item(QUEUE, "discarded");
                return;
            }
        };

        match self.service.persist(&message).await {
            Ok(persisted) => {
                metrics::record_queue_item(QUEUE, "persisted");
                debug!(temp_id = %message.temp_id, message_id = %persisted.id, "Message persisted");
                self.bus
                    .publish(BusEvent::MessagePersisted(MessagePersisted {
                        temp_id: message.temp_id,
                        message: persisted,
                    }))
                    .await;
            }
            Err(e) if e.is_transient() => {
                let attempts = message.record_failure();
                if attempts < self.settings.max_retries {
                    warn!(
                        temp_id = %message.temp_id,
                        attempts,
                        error = %e,
                        "Message persistence failed, requeueing"
                    );
                    match self.queue.push(&message).await {
                        Ok(()) => metrics::record_queue_item(QUEUE, "requeued"),
                        Err(push_err) => {
                            error!(temp_id = %message.temp_id, error = %push_err, "Failed to requeue message");
                            self.drop_message(message, "Message could not be saved").await;
                        }
                    }
                } else {
                    error!(
                        temp_id = %message.temp_id,
                        user_id = %message.user_id,
                        room_id = %message.room_id,
                        attempts,
                        error = %e,
                        "Message lost after exhausting retries"
                    );
                    self.drop_message(message, "Message could not be saved").await;
                }
            }
            Err(e) => {
                warn!(temp_id = %message.temp_id, error = %e, "Message rejected at persistence");
                let reason = e.client_message();
                self.drop_message(message, &reason).await;
            }
        }
    }

    async fn drop_message(&self, message: QueuedMessage, reason: &str) {
        metrics::record_queue_item(QUEUE, "dropped");
        self.bus
            .publish(BusEvent::MessageDropped(MessageDropped {
                temp_id: message.temp_id,
                room_id: message.room_id,
                user_id: message.user_id,
                reason: reason.to_string(),
            }))
            .await;
    }
}
