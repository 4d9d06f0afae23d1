//! Queues
//!
//! Asynchronous FIFOs that decouple socket handling from durable storage:
//!
//! - **MessageQueue**: newly submitted messages awaiting persistence
//! - **RoomQueue**: join and leave requests awaiting membership writes
//!
//! Each worker runs at most one batch at a time per process. Several processes
//! may drain the same queue; the store's atomic pop hands each item to one of
//! them.

mod message_queue;
mod room_queue;

pub use message_queue::{MessageQueue, MessageQueueWorker};
pub use room_queue::{RoomQueue, RoomQueueStats, RoomQueueWorker};

use std::sync::atomic::{AtomicBool, Ordering};

/// Holds a worker's "batch in flight" flag for the duration of a batch.
pub(crate) struct InFlightGuard<'a>(&'a AtomicBool);

impl<'a> InFlightGuard<'a> {
    /// `None` when another batch already holds the flag.
    pub(crate) fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        (!flag.swap(true, Ordering::AcqRel)).then_some(Self(flag))
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
