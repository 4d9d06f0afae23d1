//! Infrastructure Layer
//!
//! Contains implementations for external services including:
//! - Database repositories (PostgreSQL)
//! - Coordination store: presence, queues and fan-out bus (Redis, in-memory)
//! - Health probes and Prometheus metrics

pub mod coordination;
pub mod database;
pub mod health;
pub mod metrics;
pub mod repositories;
