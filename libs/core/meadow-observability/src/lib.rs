//! Observability utilities shared by the Meadow extractor and transformer.
//!
//! This crate provides:
//! - Prometheus metrics recording and export
//! - Custom metrics for plan execution and dispatch
//! - Axum middleware for automatic request metrics
//!
//! # Example
//!
//! ```rust,ignore
//! use observability::{init_metrics, metrics_handler, ExtractionMetrics};
//!
//! // Initialize metrics recorder
//! init_metrics();
//!
//! // Record a plan execution
//! ExtractionMetrics::record_plan_execution("t1", "orders", "completed", 430);
//!
//! // Add metrics endpoint to router
//! let app = Router::new()
//!     .route("/metrics", get(metrics_handler));
//! ```

pub mod dispatch;
pub mod extraction;
pub mod middleware;

pub use dispatch::DispatchMetrics;
pub use extraction::ExtractionMetrics;
pub use middleware::MetricsLayer;

// Re-export metrics macros for convenience
pub use metrics::{counter, gauge, histogram};

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use tracing::info;

static METRICS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Initialize the Prometheus metrics recorder.
///
/// This should be called once at application startup.
/// Returns the PrometheusHandle for rendering metrics.
pub fn init_metrics() -> &'static PrometheusHandle {
    METRICS_HANDLE.get_or_init(|| {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .expect("Failed to install Prometheus recorder");

        info!("Prometheus metrics recorder initialized");

        register_metric_descriptions();

        handle
    })
}

/// Get the metrics handle (must call init_metrics first)
pub fn get_metrics_handle() -> Option<&'static PrometheusHandle> {
    METRICS_HANDLE.get()
}

/// Axum handler for /metrics endpoint
pub async fn metrics_handler() -> String {
    match get_metrics_handle() {
        Some(handle) => handle.render(),
        None => "# Metrics not initialized\n".to_string(),
    }
}

/// Register metric descriptions for documentation
fn register_metric_descriptions() {
    use metrics::describe_counter;
    use metrics::describe_gauge;
    use metrics::describe_histogram;

    // HTTP metrics
    describe_counter!("http_requests_total", "Total number of HTTP requests");
    describe_histogram!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds"
    );
    describe_counter!(
        "http_requests_errors_total",
        "Total number of HTTP request errors"
    );

    // Extractor metrics
    describe_counter!(
        "meadow_step_attempts_total",
        "Total HTTP step attempts by tenant, integration, and outcome"
    );
    describe_counter!(
        "meadow_plan_executions_total",
        "Total finished plan executions by tenant, plan, and outcome"
    );
    describe_histogram!(
        "meadow_plan_execution_duration_seconds",
        "Plan execution wall-clock duration"
    );
    describe_histogram!(
        "meadow_rate_limit_wait_seconds",
        "Time spent waiting on the rate limiter before a step ran"
    );
    describe_counter!(
        "meadow_auth_token_fetches_total",
        "Total auth token fetches by tenant and integration, split by cache hit/miss"
    );

    // Transformer metrics
    describe_counter!(
        "meadow_dispatch_events_processed_total",
        "Total inbound events processed by the dispatch pipeline"
    );
    describe_counter!(
        "meadow_dispatch_binding_matches_total",
        "Total binding match attempts, split by whether any binding matched"
    );
    describe_counter!(
        "meadow_dispatch_errors_total",
        "Total dispatch failures by stage"
    );
    describe_counter!(
        "meadow_dispatch_output_records_total",
        "Total output records published by topic"
    );
    describe_gauge!(
        "meadow_dispatch_active_tenants",
        "Number of tenants currently active in a consumer process"
    );
}
