//! Prometheus Metrics Module
//!
//! Provides application-wide metrics collection using Prometheus.
//!
//! # Metrics Collected
//! - Active WebSocket connection gauges
//! - Queue item outcomes per queue
//! - Worker batch duration histograms
//! - Fan-out bus traffic per topic
//! - Degraded (local-only) coordination mode

use once_cell::sync::Lazy;
use prometheus::{
    Encoder, GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

const NAMESPACE: &str = "realtime_chat";

/// Global metrics registry
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

/// Active WebSocket connections gauge
pub static WEBSOCKET_CONNECTIONS_ACTIVE: Lazy<GaugeVec> = Lazy::new(|| {
    GaugeVec::new(
        Opts::new(
            "websocket_connections_active",
            "Number of active WebSocket connections",
        )
        .namespace(NAMESPACE),
        &["state"], // "connected", "authenticated"
    )
    .expect("Failed to create WEBSOCKET_CONNECTIONS_ACTIVE metric")
});

/// Queue item outcomes: enqueued, persisted, requeued, dropped, confirmed, failed
pub static QUEUE_ITEMS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("queue_items_total", "Queue items by outcome").namespace(NAMESPACE),
        &["queue", "outcome"],
    )
    .expect("Failed to create QUEUE_ITEMS_TOTAL metric")
});

/// Batch processing time per queue
pub static QUEUE_BATCH_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    let buckets = vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0];
    HistogramVec::new(
        HistogramOpts::new(
            "queue_batch_duration_seconds",
            "Time spent processing one queue batch",
        )
        .namespace(NAMESPACE)
        .buckets(buckets),
        &["queue"],
    )
    .expect("Failed to create QUEUE_BATCH_DURATION_SECONDS metric")
});

/// Fan-out bus events by topic and direction
pub static BUS_EVENTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("bus_events_total", "Fan-out bus events").namespace(NAMESPACE),
        &["topic", "direction"], // "published", "received"
    )
    .expect("Failed to create BUS_EVENTS_TOTAL metric")
});

/// 1 while presence and fan-out run local-only
pub static COORDINATION_DEGRADED: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::with_opts(
        Opts::new(
            "coordination_degraded",
            "Whether the coordination store is unreachable",
        )
        .namespace(NAMESPACE),
    )
    .expect("Failed to create COORDINATION_DEGRADED metric")
});

/// Register all metrics with the registry
fn register_metrics(registry: &Registry) {
    registry
        .register(Box::new(WEBSOCKET_CONNECTIONS_ACTIVE.clone()))
        .expect("Failed to register WEBSOCKET_CONNECTIONS_ACTIVE");
    registry
        .register(Box::new(QUEUE_ITEMS_TOTAL.clone()))
        .expect("Failed to register QUEUE_ITEMS_TOTAL");
    registry
        .register(Box::new(QUEUE_BATCH_DURATION_SECONDS.clone()))
        .expect("Failed to register QUEUE_BATCH_DURATION_SECONDS");
    registry
        .register(Box::new(BUS_EVENTS_TOTAL.clone()))
        .expect("Failed to register BUS_EVENTS_TOTAL");
    registry
        .register(Box::new(COORDINATION_DEGRADED.clone()))
        .expect("Failed to register COORDINATION_DEGRADED");
}

/// Collect and encode all metrics as Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Helper to record a queue item outcome
pub fn record_queue_item(queue: &str, outcome: &str) {
    QUEUE_ITEMS_TOTAL.with_label_values(&[queue, outcome]).inc();
}

pub fn record_batch_duration(queue: &str, duration_secs: f64) {
    QUEUE_BATCH_DURATION_SECONDS
        .with_label_values(&[queue])
        .observe(duration_secs);
}

pub fn record_bus_event(topic: &str, direction: &str) {
    BUS_EVENTS_TOTAL.with_label_values(&[topic, direction]).inc();
}

pub fn set_degraded(degraded: bool) {
    COORDINATION_DEGRADED.set(i64::from(degraded));
}

/// Helper to update WebSocket connection count
pub fn set_websocket_connections(connected: i64, authenticated: i64) {
    WEBSOCKET_CONNECTIONS_ACTIVE
        .with_label_values(&["connected"])
        .set(connected as f64);
    WEBSOCKET_CONNECTIONS_ACTIVE
        .with_label_values(&["authenticated"])
        .set(authenticated as f64);
}
