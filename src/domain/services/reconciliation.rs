//! Reconciliation of optimistic and durable message copies.
//!
//! A sent message reaches clients in up to two shapes: the optimistic copy
//! broadcast before persistence, and the persisted copy once the worker has
//! stored it. Both carry the same `tempId`. `reconcile` folds delivery events
//! into a room timeline so that a `tempId` never appears twice.

use serde::{Deserialize, Serialize};

use crate::domain::entities::{OptimisticMessage, PersistedMessage};

/// A delivery event for one message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Delivery {
    /// Rendered before persistence, `pending: true`
    Optimistic(OptimisticMessage),
    /// Stored durably under a snowflake id
    Confirmed {
        temp_id: String,
        message: PersistedMessage,
    },
    /// Dropped by the worker or timed out waiting for confirmation
    Failed { temp_id: String, reason: String },
}

impl Delivery {
    pub fn temp_id(&self) -> &str {
        match self {
            Self::Optimistic(m) => &m.temp_id,
            Self::Confirmed { temp_id, .. } | Self::Failed { temp_id, .. } => temp_id,
        }
    }
}

/// One slot in a room timeline as a client renders it.
#[derive(Debug, Clone, PartialEq)]
pub enum TimelineEntry {
    Pending(OptimisticMessage),
    Delivered {
        temp_id: Option<String>,
        message: PersistedMessage,
    },
    Failed {
        message: OptimisticMessage,
        reason: String,
    },
}

impl TimelineEntry {
    pub fn temp_id(&self) -> Option<&str> {
        match self {
            Self::Pending(m) => Some(&m.temp_id),
            Self::Delivered { temp_id, .. } => temp_id.as_deref(),
            Self::Failed { message, .. } => Some(&message.temp_id),
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }
}

/// Apply a delivery to a timeline.
///
/// Confirmation replaces a pending or failed copy in place; failure only
/// replaces a pending copy. Redelivered events leave the timeline unchanged.
pub fn reconcile(mut timeline: Vec<TimelineEntry>, delivery: Delivery) -> Vec<TimelineEntry> {
    let position = timeline
        .iter()
        .position(|entry| entry.temp_id() == Some(delivery.temp_id()));

    match delivery {
        Delivery::Optimistic(message) => {
            if position.is_none() {
                timeline.push(TimelineEntry::Pending(message));
            }
        }
        Delivery::Confirmed { temp_id, message } => {
            let already_delivered = timeline.iter().any(|entry| {
                matches!(entry, TimelineEntry::Delivered { message: m, .. } if m.id == message.id)
            });
            if already_delivered {
                return timeline;
            }
            let delivered = TimelineEntry::Delivered {
                temp_id: Some(temp_id),
                message,
            };
            match position {
                Some(i) => timeline[i] = delivered,
                None => timeline.push(delivered),
            }
        }
        Delivery::Failed { reason, .. } => {
            if let Some(i) = position {
                if let TimelineEntry::Pending(message) = &timeline[i] {
                    timeline[i] = TimelineEntry::Failed {
                        message: message.clone(),
                        reason,
                    };
                }
            }
        }
    }

    timeline
}
