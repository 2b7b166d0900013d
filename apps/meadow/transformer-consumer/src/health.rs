//! Health and metrics endpoints for the transformer consumer.
//!
//! `meadow-stream-worker::HealthState` is keyed to a single stream name,
//! which doesn't fit a process that consumes several topics per tenant
//! across an arbitrary number of tenants — this is a small router built
//! the same way, just without the single-stream assumption.

use axum::{extract::State, routing::get, Json, Router};
use redis::aio::ConnectionManager;
use serde::Serialize;
use std::sync::Arc;

#[derive(Clone)]
pub struct HealthState {
    pub redis: ConnectionManager,
    pub app_name: &'static str,
    pub app_version: &'static str,
    pub tenant_ids: Arc<Vec<String>>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    name: &'static str,
    version: &'static str,
    tenants: usize,
}

pub fn health_router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/readyz", get(ready_handler))
        .route("/metrics", get(meadow_observability::metrics_handler))
        .with_state(state)
}

async fn health_handler(State(state): State<HealthState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        name: state.app_name,
        version: state.app_version,
        tenants: state.tenant_ids.len(),
    })
}

async fn ready_handler(State(state): State<HealthState>) -> Json<HealthResponse> {
    let mut conn = state.redis.clone();
    let ping: Result<String, _> = redis::cmd("PING").query_async(&mut conn).await;
    Json(HealthResponse {
        status: if ping.is_ok() { "ready" } else { "not_ready" },
        name: state.app_name,
        version: state.app_version,
        tenants: state.tenant_ids.len(),
    })
}
