//! Optimistic messages awaiting confirmation on this gateway.
//!
//! Tracks every `new_message` delivered to local sockets until its durable
//! copy or a drop notice arrives, and remembers recently settled temp ids so
//! a redelivered bus event never produces a second `message_confirmed` or
//! `message_failed`.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::domain::Snowflake;

/// Settled temp ids remembered per outcome.
const SETTLED_CAPACITY: usize = 4096;

#[derive(Debug)]
struct PendingEntry {
    room_id: Snowflake,
    tracked_at: Instant,
}

/// Insertion-ordered set that forgets its oldest entries past `capacity`.
#[derive(Debug)]
struct RecentSet {
    order: VecDeque<String>,
    members: HashSet<String>,
    capacity: usize,
}

impl RecentSet {
    fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::new(),
            members: HashSet::new(),
            capacity,
        }
    }

    fn contains(&self, id: &str) -> bool {
        self.members.contains(id)
    }

    /// `false` when already present.
    fn insert(&mut self, id: &str) -> bool {
        if !self.members.insert(id.to_string()) {
            return false;
        }
        self.order.push_back(id.to_string());
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
            }
        }
        true
    }
}

#[derive(Debug)]
struct State {
    pending: HashMap<String, PendingEntry>,
    confirmed: RecentSet,
    failed: RecentSet,
}

#[derive(Debug)]
pub struct PendingTracker {
    state: Mutex<State>,
}

impl PendingTracker {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                pending: HashMap::new(),
                confirmed: RecentSet::new(SETTLED_CAPACITY),
                failed: RecentSet::new(SETTLED_CAPACITY),
            }),
        }
    }

    /// Start waiting for `temp_id`. Ignored if it already settled.
    pub fn track(&self, temp_id: &str, room_id: Snowflake) {
        let mut state = self.state.lock();
        if state.confirmed.contains(temp_id) || state.failed.contains(temp_id) {
            return;
        }
        state.pending.entry(temp_id.to_string()).or_insert(PendingEntry {
            room_id,
            tracked_at: Instant::now(),
        });
    }

    /// Whether `message_confirmed` should be emitted for `temp_id`.
    ///
    /// True exactly once per temp id, including after an earlier failure.
    pub fn confirm(&self, temp_id: &str) -> bool {
        let mut state = self.state.lock();
        state.pending.remove(temp_id);
        state.confirmed.insert(temp_id)
    }

    /// Whether `message_failed` should be emitted for `temp_id`.
    ///
    /// False once confirmed or already failed.
    pub fn fail(&self, temp_id: &str) -> bool {
        let mut state = self.state.lock();
        state.pending.remove(temp_id);
        if state.confirmed.contains(temp_id) {
            return false;
        }
        state.failed.insert(temp_id)
    }

    /// Remove and fail every entry tracked for at least `timeout`.
    pub fn drain_expired(&self, timeout: Duration) -> Vec<(String, Snowflake)> {
        let mut state = self.state.lock();
        let expired: Vec<(String, Snowflake)> = state
            .pending
            .iter()
            .filter(|(_, entry)| entry.tracked_at.elapsed() >= timeout)
            .map(|(temp_id, entry)| (temp_id.clone(), entry.room_id))
            .collect();

        for (temp_id, _) in &expired {
            state.pending.remove(temp_id);
            state.failed.insert(temp_id);
        }
        expired
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }
}

impl Default for PendingTracker {
    fn default() -> Self {
        Self::new()
    }
}
