//! Room Membership Queue
//!
//! A pair of FIFOs serializing join and leave side effects against the
//! durable membership table. The worker reports every request back through
//! the fan-out bus; only the gateway holding the originating connection acts
//! on the outcome.
//!
//! Per request: `Requested -> Processing -> Confirmed | Failed`.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::InFlightGuard;
use crate::config::QueueSettings;
use crate::domain::events::BusEvent;
use crate::domain::{
    Membership, MembershipOutcome, MembershipRepository, MutationState, RoomJoinRequest,
    RoomLeaveRequest, RoomRepository,
};
use crate::infrastructure::coordination::{keys, FanoutBus, PresenceStore, QueueStore};
use crate::infrastructure::metrics;
use crate::shared::error::AppError;

const JOIN_QUEUE: &str = keys::ROOM_JOIN_QUEUE;
const LEAVE_QUEUE: &str = keys::ROOM_LEAVE_QUEUE;

/// Queue depths, surfaced by the readiness probe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomQueueStats {
    pub join_queue: usize,
    pub leave_queue: usize,
}

/// Handle for enqueueing membership changes.
#[derive(Clone)]
pub struct RoomQueue {
    store: Arc<dyn QueueStore>,
}

impl RoomQueue {
    pub fn new(store: Arc<dyn QueueStore>) -> Self {
        Self { store }
    }

    pub async fn enqueue_join(&self, request: &RoomJoinRequest) -> Result<(), AppError> {
        self.store.push(JOIN_QUEUE, serde_json::to_string(request)?).await?;
        metrics::record_queue_item(JOIN_QUEUE, "enqueued");
        debug!(user_id = %request.user_id, room_id = %request.room_id, state = ?MutationState::Requested, "Join enqueued");
        Ok(())
    }

    pub async fn enqueue_leave(&self, request: &RoomLeaveRequest) -> Result<(), AppError> {
        self.store.push(LEAVE_QUEUE, serde_json::to_string(request)?).await?;
        metrics::record_queue_item(LEAVE_QUEUE, "enqueued");
        debug!(user_id = %request.user_id, room_id = %request.room_id, state = ?MutationState::Requested, "Leave enqueued");
        Ok(())
    }

    pub async fn stats(&self) -> Result<RoomQueueStats, AppError> {
        Ok(RoomQueueStats {
            join_queue: self.store.len(JOIN_QUEUE).await?,
            leave_queue: self.store.len(LEAVE_QUEUE).await?,
        })
    }

    /// Discard pending joins and leaves. Administrative.
    pub async fn clear(&self) -> Result<(), AppError> {
        warn!("Clearing room membership queues");
        self.store.clear(JOIN_QUEUE).await?;
        self.store.clear(LEAVE_QUEUE).await
    }
}

/// Background worker applying membership changes.
pub struct RoomQueueWorker {
    queue: RoomQueue,
    rooms: Arc<dyn RoomRepository>,
    memberships: Arc<dyn MembershipRepository>,
    presence: Arc<dyn PresenceStore>,
    bus: Arc<dyn FanoutBus>,
    settings: QueueSettings,
    in_flight: AtomicBool,
}

impl RoomQueueWorker {
    pub fn new(
        queue: RoomQueue,
        rooms: Arc<dyn RoomRepository>,
        memberships: Arc<dyn MembershipRepository>,
        presence: Arc<dyn PresenceStore>,
        bus: Arc<dyn FanoutBus>,
        settings: QueueSettings,
    ) -> Self {
        Self {
            queue,
            rooms,
            memberships,
            presence,
            bus,
            settings,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Drain both queues until shutdown is signalled.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!("Room queue worker started");

        while !*shutdown.borrow() {
            let processed = match self.process_batch().await {
                Ok(n) => n,
                Err(e) => {
                    error!(error = %e, "Failed to pop room queue batch");
                    0
                }
            };

            if processed == 0 {
                let interval = self.settings.poll_interval();
                tokio::select! {
                    _ = self.queue.store.wait_for_push(JOIN_QUEUE, interval) => {}
                    _ = self.queue.store.wait_for_push(LEAVE_QUEUE, interval) => {}
                    _ = shutdown.changed() => {}
                }
            }
        }

        info!("Room queue worker stopped");
    }

    /// Process one batch of joins, then one batch of leaves.
    ///
    /// Requests are handled one at a time so checks and writes for the same
    /// user and room never interleave within this process.
    pub async fn process_batch(&self) -> Result<usize, AppError> {
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight) else {
            return Ok(0);
        };

        let started = Instant::now();
        let joins = self.queue.store.pop_batch(JOIN_QUEUE, self.settings.batch_size).await?;
        for item in &joins {
            match serde_json::from_str::<RoomJoinRequest>(item) {
                Ok(request) => self.process_join(request).await,
                Err(e) => warn!(error = %e, "Discarding unparsable join request"),
            }
        }

        let leaves = self.queue.store.pop_batch(LEAVE_QUEUE, self.settings.batch_size).await?;
        for item in &leaves {
            match serde_json::from_str::<RoomLeaveRequest>(item) {
                Ok(request) => self.process_leave(request).await,
                Err(e) => warn!(error = %e, "Discarding unparsable leave request"),
            }
        }

        let count = joins.len() + leaves.len();
        if count > 0 {
            metrics::record_batch_duration("room_queue", started.elapsed().as_secs_f64());
            debug!(joins = joins.len(), leaves = leaves.len(), "Processed room queue batch");
        }
        Ok(count)
    }

    async fn process_join(&self, request: RoomJoinRequest) {
        debug!(user_id = %request.user_id, room_id = %request.room_id, state = ?MutationState::Processing, "Processing join");

        let outcome = match self.try_join(&request).await {
            Ok(()) => MembershipOutcome::confirmed(&request),
            Err(e) if e.is_transient() => {
                warn!(user_id = %request.user_id, room_id = %request.room_id, error = %e, "Join failed, retrying once");
                tokio::time::sleep(self.settings.join_retry_delay()).await;
                match self.try_join(&request).await {
                    Ok(()) => MembershipOutcome::confirmed(&request),
                    Err(e) => {
                        error!(user_id = %request.user_id, room_id = %request.room_id, error = %e, "Join failed after retry");
                        MembershipOutcome::failed(&request, e.client_message())
                    }
                }
            }
            Err(e) => {
                debug!(user_id = %request.user_id, room_id = %request.room_id, error = %e, "Join rejected");
                MembershipOutcome::failed(&request, e.client_message())
            }
        };

        metrics::record_queue_item(JOIN_QUEUE, if outcome.is_success() { "confirmed" } else { "failed" });
        debug!(user_id = %request.user_id, room_id = %request.room_id, state = ?outcome.state, "Join processed");
        self.bus.publish(BusEvent::RoomJoinProcessed(outcome)).await;
    }

    /// An existing membership counts as success, so duplicate requests and
    /// retries converge on one row.
    async fn try_join(&self, request: &RoomJoinRequest) -> Result<(), AppError> {
        let (user_id, room_id) = (request.user_id, request.room_id);

        if self.memberships.find(user_id, room_id).await?.is_none() {
            let room = self
                .rooms
                .find_by_id(room_id)
                .await?
                .ok_or_else(|| AppError::NotFound("Room not found".into()))?;

            if self.memberships.is_banned(user_id, room_id).await? {
                return Err(AppError::AccessDenied("You are banned from this room".into()));
            }
            if room.is_direct {
                return Err(AppError::AccessDenied("Cannot join a direct message room".into()));
            }
            if !room.is_self_joinable() {
                return Err(AppError::AccessDenied(
                    "Cannot join private room without invitation".into(),
                ));
            }

            if !self.memberships.insert(&Membership::new(room_id, user_id)).await? {
                debug!(user_id = %user_id, room_id = %room_id, "Membership created concurrently");
            }
        }

        self.presence.add_to_room(user_id, room_id).await
    }

    async fn process_leave(&self, request: RoomLeaveRequest) {
        debug!(user_id = %request.user_id, room_id = %request.room_id, state = ?MutationState::Processing, "Processing leave");

        let outcome = match self.try_leave(&request).await {
            Ok(()) => MembershipOutcome::confirmed(&request),
            Err(e) => {
                warn!(user_id = %request.user_id, room_id = %request.room_id, error = %e, "Leave failed");
                MembershipOutcome::failed(&request, e.client_message())
            }
        };

        metrics::record_queue_item(LEAVE_QUEUE, if outcome.is_success() { "confirmed" } else { "failed" });
        self.bus.publish(BusEvent::RoomLeaveProcessed(outcome)).await;
    }

    /// Direct rooms keep the membership row so history stays reachable;
    /// group rooms delete it. A room that no longer exists is treated as a
    /// group room.
    async fn try_leave(&self, request: &RoomLeaveRequest) -> Result<(), AppError> {
        let (user_id, room_id) = (request.user_id, request.room_id);

        let is_direct = self
            .rooms
            .find_by_id(room_id)
            .await?
            .is_some_and(|room| room.is_direct);

        if !is_direct {
            self.memberships.delete(user_id, room_id).await?;
        }
        self.presence.remove_from_room(user_id, room_id).await
    }
}
