//! Health probes for the readiness endpoint.
//!
//! Each dependency is checked through a [`HealthProbe`]. A failing critical
//! probe (the database) makes the server unready; the coordination store and
//! bus only degrade it, since delivery falls back to local-only.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;

use super::coordination::{FanoutBus, PresenceStore};
use crate::shared::error::AppError;

#[async_trait]
pub trait HealthProbe: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether a failure makes the server unable to accept traffic.
    fn is_critical(&self) -> bool;

    async fn check(&self) -> Result<(), AppError>;
}

/// `SELECT 1` against the pool.
pub struct DatabaseProbe {
    pool: PgPool,
}

impl DatabaseProbe {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HealthProbe for DatabaseProbe {
    fn name(&self) -> &'static str {
        "database"
    }

    fn is_critical(&self) -> bool {
        true
    }

    async fn check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Reachability of the presence store.
pub struct PresenceProbe {
    store: Arc<dyn PresenceStore>,
    local_only: bool,
}

impl PresenceProbe {
    pub fn new(store: Arc<dyn PresenceStore>, local_only: bool) -> Self {
        Self { store, local_only }
    }
}

#[async_trait]
impl HealthProbe for PresenceProbe {
    fn name(&self) -> &'static str {
        "coordination_store"
    }

    fn is_critical(&self) -> bool {
        false
    }

    async fn check(&self) -> Result<(), AppError> {
        if self.local_only {
            return Err(AppError::BusUnavailable(
                "running with in-memory presence (local-only)".into(),
            ));
        }
        self.store.ping().await
    }
}

/// Subscription state of the fan-out bus.
pub struct BusProbe {
    bus: Arc<dyn FanoutBus>,
}

impl BusProbe {
    pub fn new(bus: Arc<dyn FanoutBus>) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl HealthProbe for BusProbe {
    fn name(&self) -> &'static str {
        "bus"
    }

    fn is_critical(&self) -> bool {
        false
    }

    async fn check(&self) -> Result<(), AppError> {
        if self.bus.is_degraded() {
            return Err(AppError::BusUnavailable("delivering locally only".into()));
        }
        self.bus.ping().await
    }
}
