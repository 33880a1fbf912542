//! Integration tests for the monitor API endpoints

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::Utc;
use monitor_lib::{health::components, HealthRegistry, HealthState, HealthVerdict, MonitorMetrics};
use podwatch::api::{create_router, AppState};
use std::sync::Arc;
use tokio::sync::watch;
use tower::ServiceExt;

struct TestApp {
    router: Router,
    state: Arc<AppState>,
    verdicts: watch::Sender<Option<HealthVerdict>>,
}

async fn setup_test_app() -> TestApp {
    let health_registry = HealthRegistry::new();
    health_registry.register(components::CLUSTER_API).await;
    health_registry.register(components::METRICS_SOURCE).await;
    health_registry.register(components::LOG_COLLECTOR).await;

    let (verdicts, rx) = watch::channel(None);
    let state = Arc::new(AppState::new(health_registry, MonitorMetrics::new(), rx));

    TestApp {
        router: create_router(state.clone()),
        state,
        verdicts,
    }
}

async fn get(router: Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let response = router
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

fn verdict(state: HealthState) -> HealthVerdict {
    HealthVerdict {
        sequence: 4,
        tick_timestamp: Utc::now(),
        state,
        reasons: vec!["endpoint GET http://orders-api:8000/health failed".to_string()],
        probes: Vec::new(),
        resources: Vec::new(),
        pods: Vec::new(),
        infrastructure_errors: Vec::new(),
    }
}

#[tokio::test]
async fn test_healthz_returns_ok_when_healthy() {
    let app = setup_test_app().await;

    let (status, body) = get(app.router, "/healthz").await;

    assert_eq!(status, StatusCode::OK);
    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "healthy");
    assert!(health["components"]["cluster_api"].is_object());
    assert!(health["components"]["metrics_source"].is_object());
    assert!(health["components"]["log_collector"].is_object());
}

#[tokio::test]
async fn test_healthz_returns_ok_when_degraded() {
    let app = setup_test_app().await;
    app.state
        .health_registry
        .set_degraded(components::METRICS_SOURCE, "1 pod sample(s) missing")
        .await;

    let (status, body) = get(app.router, "/healthz").await;

    // Degraded dependencies still leave the monitor operational
    assert_eq!(status, StatusCode::OK);
    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "degraded");
}

#[tokio::test]
async fn test_healthz_returns_503_when_unhealthy() {
    let app = setup_test_app().await;
    app.state
        .health_registry
        .set_unhealthy(components::CLUSTER_API, "connection refused")
        .await;

    let (status, body) = get(app.router, "/healthz").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "unhealthy");
    assert_eq!(
        health["components"]["cluster_api"]["message"],
        "connection refused"
    );
}

#[tokio::test]
async fn test_readyz_returns_503_before_first_tick() {
    let app = setup_test_app().await;

    let (status, body) = get(app.router, "/readyz").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let readiness: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(readiness["ready"], false);
}

#[tokio::test]
async fn test_readyz_returns_ok_when_ready() {
    let app = setup_test_app().await;
    app.state.health_registry.set_ready(true).await;

    let (status, body) = get(app.router, "/readyz").await;

    assert_eq!(status, StatusCode::OK);
    let readiness: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(readiness["ready"], true);
}

#[tokio::test]
async fn test_status_returns_503_before_first_tick() {
    let app = setup_test_app().await;

    let (status, _) = get(app.router, "/status").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_status_returns_latest_verdict() {
    let app = setup_test_app().await;
    app.verdicts.send_replace(Some(verdict(HealthState::Unhealthy)));

    let (status, body) = get(app.router, "/status").await;

    // The monitor itself is fine even when the watched service is not
    assert_eq!(status, StatusCode::OK);
    let latest: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(latest["state"], "unhealthy");
    assert_eq!(latest["sequence"], 4);
    assert_eq!(latest["reasons"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_metrics_endpoint_returns_prometheus_format() {
    let app = setup_test_app().await;
    app.state.metrics.observe_tick_duration(0.12);
    app.state.metrics.set_health_state(HealthState::Degraded);
    app.state.metrics.inc_probe_failures("timeout");

    let response = app
        .router
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers().get("content-type").unwrap();
    assert!(content_type.to_str().unwrap().contains("text/plain"));

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let metrics_text = String::from_utf8(body.to_vec()).unwrap();

    assert!(metrics_text.contains("podwatch_tick_duration_seconds_bucket"));
    assert!(metrics_text.contains("podwatch_tick_duration_seconds_count"));
    assert!(metrics_text.contains("podwatch_health_state"));
    assert!(metrics_text.contains("podwatch_probe_failures_total"));
}
