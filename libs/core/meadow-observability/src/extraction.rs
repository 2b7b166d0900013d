//! Extractor-side metrics: plan executions and step attempts.

use metrics::{counter, histogram};

/// Extraction metrics recorder.
pub struct ExtractionMetrics;

impl ExtractionMetrics {
    /// Record a single HTTP step attempt.
    pub fn record_step_attempt(tenant_id: &str, integration: &str, outcome: &str) {
        counter!(
            "meadow_step_attempts_total",
            "tenant_id" => tenant_id.to_string(),
            "integration" => integration.to_string(),
            "outcome" => outcome.to_string()
        )
        .increment(1);
    }

    /// Record a finished plan execution (success, permanent error, or
    /// transient error that exhausted retries).
    pub fn record_plan_execution(tenant_id: &str, plan_key: &str, outcome: &str, duration_ms: u64) {
        counter!(
            "meadow_plan_executions_total",
            "tenant_id" => tenant_id.to_string(),
            "plan_key" => plan_key.to_string(),
            "outcome" => outcome.to_string()
        )
        .increment(1);
        histogram!(
            "meadow_plan_execution_duration_seconds",
            "tenant_id" => tenant_id.to_string(),
            "plan_key" => plan_key.to_string()
        )
        .record(duration_ms as f64 / 1000.0);

        tracing::debug!(tenant_id, plan_key, outcome, duration_ms, "plan execution finished");
    }

    /// Record time spent waiting on the rate limiter before a step ran.
    pub fn record_rate_limit_wait(tenant_id: &str, integration: &str, wait_ms: u64) {
        histogram!(
            "meadow_rate_limit_wait_seconds",
            "tenant_id" => tenant_id.to_string(),
            "integration" => integration.to_string()
        )
        .record(wait_ms as f64 / 1000.0);
    }

    /// Record an auth token fetch, distinguishing cache hits from live
    /// flow executions.
    pub fn record_auth_token_fetch(tenant_id: &str, integration: &str, cache_hit: bool) {
        counter!(
            "meadow_auth_token_fetches_total",
            "tenant_id" => tenant_id.to_string(),
            "integration" => integration.to_string(),
            "cache_hit" => cache_hit.to_string()
        )
        .increment(1);
    }
}
