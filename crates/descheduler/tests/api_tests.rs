//! Integration tests for the health and metrics endpoints

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use descheduler_lib::health::{components, ComponentHealth};
use descheduler_lib::{ComponentStatus, DeschedulerMetrics, HealthRegistry};
use prometheus::{Encoder, TextEncoder};
use std::sync::Arc;
use tower::ServiceExt;

#[derive(Clone)]
struct AppState {
    health: HealthRegistry,
}

async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health.health().await;
    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(health))
}

async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health.readiness().await;
    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status_code, Json(readiness))
}

async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
}

fn create_test_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

async fn setup_test_app() -> (Router, HealthRegistry) {
    let health = HealthRegistry::new();
    health.register(components::CLUSTER_CLIENT).await;
    health.register(components::CONTROLLER).await;

    let state = Arc::new(AppState {
        health: health.clone(),
    });
    (create_test_router(state), health)
}

async fn get_status(app: Router, uri: &str) -> StatusCode {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    response.status()
}

#[tokio::test]
async fn test_healthz_ok_when_healthy() {
    let (app, _health) = setup_test_app().await;
    assert_eq!(get_status(app, "/healthz").await, StatusCode::OK);
}

#[tokio::test]
async fn test_healthz_ok_when_degraded() {
    let (app, health) = setup_test_app().await;
    health
        .update(
            components::CONTROLLER,
            ComponentHealth::degraded("cycle failed"),
        )
        .await;

    assert_eq!(get_status(app, "/healthz").await, StatusCode::OK);
}

#[tokio::test]
async fn test_healthz_unavailable_when_unhealthy() {
    let (app, health) = setup_test_app().await;
    health
        .update(
            components::CLUSTER_CLIENT,
            ComponentHealth::unhealthy("connection lost"),
        )
        .await;

    assert_eq!(
        get_status(app, "/healthz").await,
        StatusCode::SERVICE_UNAVAILABLE
    );
}

#[tokio::test]
async fn test_readyz_tracks_initialization() {
    let (app, health) = setup_test_app().await;
    assert_eq!(
        get_status(app.clone(), "/readyz").await,
        StatusCode::SERVICE_UNAVAILABLE
    );

    health.set_ready(true).await;
    assert_eq!(get_status(app, "/readyz").await, StatusCode::OK);
}

#[tokio::test]
async fn test_metrics_exposition() {
    let (app, _health) = setup_test_app().await;

    // make sure the descheduler metrics are registered
    let metrics = DeschedulerMetrics::new();
    metrics.record_cycle(0.1, 2, 0);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("descheduler_cycles_total"));
    assert!(text.contains("descheduler_evictions_total"));
}
