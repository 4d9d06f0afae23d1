//! Health Check Handlers
//!
//! # Endpoints
//! - `GET /health` - Basic health check
//! - `GET /health/live` - Liveness probe (is the server running?)
//! - `GET /health/ready` - Readiness probe: dependency reachability, queue
//!   depths and live connections

use std::sync::Arc;
use std::time::Instant;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use once_cell::sync::Lazy;
use serde::Serialize;

use crate::application::queues::RoomQueueStats;
use crate::infrastructure::health::HealthProbe;
use crate::startup::AppState;

static SERVER_START: Lazy<Instant> = Lazy::new(Instant::now);
static SERVER_START_TIME: Lazy<DateTime<Utc>> = Lazy::new(Utc::now);

/// Pin the start time (call during startup).
pub fn init_server_start() {
    Lazy::force(&SERVER_START);
    Lazy::force(&SERVER_START_TIME);
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Serialize)]
pub struct LivenessResponse {
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub status: HealthStatus,
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub started_at: String,
    pub checks: Vec<ProbeResult>,
    pub queues: QueueHealth,
    pub websocket: WebSocketHealth,
}

#[derive(Debug, Serialize)]
pub struct ProbeResult {
    pub name: &'static str,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip)]
    critical: bool,
}

#[derive(Debug, Default, Serialize)]
pub struct QueueHealth {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub messages: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub membership: Option<RoomQueueStats>,
}

#[derive(Debug, Serialize)]
pub struct WebSocketHealth {
    pub active_connections: usize,
    pub authenticated_connections: usize,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub async fn liveness() -> Json<LivenessResponse> {
    Json(LivenessResponse { status: "alive" })
}

/// 200 while the database is reachable, 503 otherwise. A lost coordination
/// store or bus reports `degraded` since delivery continues locally.
pub async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    let checks = join_all(state.probes.iter().map(|probe| run_probe(probe))).await;

    let queues = QueueHealth {
        messages: state.message_queue.size().await.ok(),
        membership: state.room_queue.stats().await.ok(),
    };

    let status = overall_status(&checks);
    let response = ReadinessResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: SERVER_START.elapsed().as_secs(),
        started_at: SERVER_START_TIME.to_rfc3339(),
        checks,
        queues,
        websocket: WebSocketHealth {
            active_connections: state.gateway.session_count(),
            authenticated_connections: state.gateway.authenticated_count(),
        },
    };

    let code = match status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (code, Json(response))
}

async fn run_probe(probe: &Arc<dyn HealthProbe>) -> ProbeResult {
    let started = Instant::now();
    let result = probe.check().await;
    let latency = started.elapsed().as_millis() as u64;

    match result {
        Ok(()) => ProbeResult {
            name: probe.name(),
            status: HealthStatus::Healthy,
            latency_ms: Some(latency),
            message: None,
            critical: probe.is_critical(),
        },
        Err(e) => ProbeResult {
            name: probe.name(),
            status: if probe.is_critical() {
                HealthStatus::Unhealthy
            } else {
                HealthStatus::Degraded
            },
            latency_ms: None,
            message: Some(e.to_string()),
            critical: probe.is_critical(),
        },
    }
}

fn overall_status(checks: &[ProbeResult]) -> HealthStatus {
    if checks
        .iter()
        .any(|c| c.critical && c.status != HealthStatus::Healthy)
    {
        HealthStatus::Unhealthy
    } else if checks.iter().any(|c| c.status != HealthStatus::Healthy) {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}
