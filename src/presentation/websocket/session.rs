//! Per-connection session state.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::messages::{Outbound, ServerEvent};
use crate::domain::{Identity, Snowflake};

/// A live socket as seen by the gateway.
///
/// The identity is unset until `authenticate` succeeds. `rooms` is the set of
/// broadcast groups this connection currently receives.
#[derive(Debug)]
pub struct ConnectedSession {
    pub connection_id: String,
    identity: RwLock<Option<Identity>>,
    rooms: Mutex<HashSet<Snowflake>>,
    auth_failures: AtomicU32,
    sender: mpsc::UnboundedSender<Outbound>,
}

impl ConnectedSession {
    pub fn new(sender: mpsc::UnboundedSender<Outbound>) -> Self {
        Self {
            connection_id: Uuid::new_v4().to_string(),
            identity: RwLock::new(None),
            rooms: Mutex::new(HashSet::new()),
            auth_failures: AtomicU32::new(0),
            sender,
        }
    }

    pub fn identity(&self) -> Option<Identity> {
        self.identity.read().clone()
    }

    pub fn user_id(&self) -> Option<Snowflake> {
        self.identity.read().as_ref().map(|i| i.user_id)
    }

    pub fn is_authenticated(&self) -> bool {
        self.identity.read().is_some()
    }

    pub(crate) fn bind(&self, identity: Identity) {
        *self.identity.write() = Some(identity);
    }

    /// Take the identity, leaving the session unauthenticated.
    pub(crate) fn unbind(&self) -> Option<Identity> {
        self.identity.write().take()
    }

    /// Count a failed `authenticate`, returning the total so far.
    pub(crate) fn record_auth_failure(&self) -> u32 {
        self.auth_failures.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn is_subscribed(&self, room_id: Snowflake) -> bool {
        self.rooms.lock().contains(&room_id)
    }

    pub(crate) fn subscribe(&self, room_id: Snowflake) -> bool {
        self.rooms.lock().insert(room_id)
    }

    pub(crate) fn unsubscribe(&self, room_id: Snowflake) -> bool {
        self.rooms.lock().remove(&room_id)
    }

    pub fn rooms(&self) -> Vec<Snowflake> {
        self.rooms.lock().iter().copied().collect()
    }

    pub(crate) fn take_rooms(&self) -> Vec<Snowflake> {
        self.rooms.lock().drain().collect()
    }

    /// Queue an event for the socket. `false` once the writer is gone.
    pub fn send(&self, event: ServerEvent) -> bool {
        self.sender.send(Outbound::Event(event)).is_ok()
    }

    /// Ask the writer to close the socket after flushing queued events.
    pub fn close(&self) {
        let _ = self.sender.send(Outbound::Close);
    }
}
