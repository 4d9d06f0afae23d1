//! Health and metrics routes.

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum_test::TestServer;
use pretty_assertions::assert_eq;
use serde_json::Value;

use realtime_chat::infrastructure::coordination::Coordination;
use realtime_chat::infrastructure::health::HealthProbe;
use realtime_chat::presentation::http::create_router;
use realtime_chat::startup::Core;

use crate::common::{test_settings, MemoryStore, StubProbe};

fn server_with(probes: Vec<Arc<dyn HealthProbe>>) -> (TestServer, Core) {
    let store = Arc::new(MemoryStore::default());
    let core = Core::assemble(
        test_settings(),
        store.repositories(),
        Coordination::in_memory(Duration::from_secs(60)),
        probes,
    );
    let server = TestServer::new(create_router(core.state.clone())).expect("test server");
    (server, core)
}

fn probe(name: &'static str, critical: bool, healthy: bool) -> Arc<dyn HealthProbe> {
    Arc::new(StubProbe {
        name,
        critical,
        healthy,
    })
}

#[tokio::test]
async fn test_health_check() {
    let (server, _core) = server_with(Vec::new());

    let response = server.get("/health").await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_liveness_ignores_dependencies() {
    let (server, _core) = server_with(vec![probe("database", true, false)]);

    let response = server.get("/health/live").await;

    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["status"], "alive");
}

#[tokio::test]
async fn test_readiness_all_healthy() {
    let (server, core) = server_with(vec![
        probe("database", true, true),
        probe("presence", false, true),
    ]);
    let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
    let _session = core.state.gateway.connect(tx);

    let response = server.get("/health/ready").await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["checks"].as_array().map(Vec::len), Some(2));
    assert_eq!(body["queues"]["messages"], 0);
    assert_eq!(body["queues"]["membership"]["joinQueue"], 0);
    assert_eq!(body["websocket"]["active_connections"], 1);
    assert_eq!(body["websocket"]["authenticated_connections"], 0);
}

#[tokio::test]
async fn test_readiness_degraded_when_store_down() {
    let (server, _core) = server_with(vec![
        probe("database", true, true),
        probe("presence", false, false),
    ]);

    let response = server.get("/health/ready").await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["checks"][1]["status"], "degraded");
    assert_eq!(body["checks"][1]["message"], "Internal error: presence is down");
}

#[tokio::test]
async fn test_readiness_unavailable_when_database_down() {
    let (server, _core) = server_with(vec![
        probe("database", true, false),
        probe("presence", false, true),
    ]);

    let response = server.get("/health/ready").await;

    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.json::<Value>()["status"], "unhealthy");
}

#[tokio::test]
async fn test_metrics_exposition() {
    let (server, _core) = server_with(Vec::new());

    let response = server.get("/metrics").await;

    response.assert_status_ok();
    let content_type = response.header("content-type");
    assert!(content_type.to_str().unwrap().starts_with("text/plain"));
}
