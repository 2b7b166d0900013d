//! Transformer-side metrics: dispatch pipeline throughput and outcomes.

use metrics::{counter, gauge};

/// Dispatch metrics recorder.
pub struct DispatchMetrics;

impl DispatchMetrics {
    /// Record one inbound event processed by the dispatch pipeline.
    pub fn record_event_processed(tenant_id: &str, event_kind: &str) {
        counter!(
            "meadow_dispatch_events_processed_total",
            "tenant_id" => tenant_id.to_string(),
            "event_kind" => event_kind.to_string()
        )
        .increment(1);
    }

    /// Record a binding match outcome for an inbound event.
    pub fn record_binding_match(tenant_id: &str, matched: bool) {
        counter!(
            "meadow_dispatch_binding_matches_total",
            "tenant_id" => tenant_id.to_string(),
            "matched" => matched.to_string()
        )
        .increment(1);
    }

    /// Record a mapping or publish failure, tagged by the stage it failed at.
    pub fn record_dispatch_error(tenant_id: &str, stage: &str) {
        counter!(
            "meadow_dispatch_errors_total",
            "tenant_id" => tenant_id.to_string(),
            "stage" => stage.to_string()
        )
        .increment(1);
    }

    /// Record an output record published to a binding's output topic.
    pub fn record_output_published(tenant_id: &str, topic: &str) {
        counter!(
            "meadow_dispatch_output_records_total",
            "tenant_id" => tenant_id.to_string(),
            "topic" => topic.to_string()
        )
        .increment(1);
    }

    /// Set the number of tenants currently active in a consumer process.
    pub fn set_active_tenants(count: usize) {
        gauge!("meadow_dispatch_active_tenants").set(count as f64);
    }
}
