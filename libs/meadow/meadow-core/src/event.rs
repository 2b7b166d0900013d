//! Bus wire formats: step-batch event, lifecycle event, inbound event.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// E out / T in. `response_body` is always a JSON array.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepBatchEvent {
    pub tenant_id: String,
    pub integration: String,
    pub plan_key: String,
    pub config_id: String,
    pub execution_id: String,
    pub step_path: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub trace_id: Option<String>,
    pub span_id: Option<String>,
    pub request_url: String,
    pub request_method: String,
    pub request_headers: Option<BTreeMap<String, String>>,
    pub status_code: u16,
    pub response_body: Value,
    pub response_headers: Option<BTreeMap<String, String>>,
    pub response_size: usize,
    pub duration_ms: u64,
    pub extracted_data: Option<Value>,
}

impl StepBatchEvent {
    /// Wrap a single response body into the always-array shape required by
    /// the wire contract: objects -> `[object]`, scalars -> `[{"value": v}]`,
    /// arrays pass through unchanged.
    pub fn wrap_response_body(body: Value) -> Value {
        match body {
            Value::Array(_) => body,
            Value::Object(_) => Value::Array(vec![body]),
            other => Value::Array(vec![serde_json::json!({ "value": other })]),
        }
    }

    /// Headers for an error emission carry `type: "step_error"`.
    pub fn error_headers() -> BTreeMap<String, String> {
        let mut h = BTreeMap::new();
        h.insert("type".to_string(), "step_error".to_string());
        h
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEventType {
    ExecutionStarted,
    ExecutionCompleted,
}

/// `{ type, tenant_id, integration, plan_key, config_id, execution_id,
/// status, timestamp }`, keyed by `tenant_id:execution_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvent {
    #[serde(rename = "type")]
    pub event_type: LifecycleEventType,
    pub tenant_id: String,
    pub integration: String,
    pub plan_key: String,
    pub config_id: String,
    pub execution_id: String,
    pub status: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl LifecycleEvent {
    pub fn kafka_key(&self) -> String {
        format!("{}:{}", self.tenant_id, self.execution_id)
    }
}

/// Subset of an inbound bus message that the transformer cares about.
/// `data` carries the raw message value;
/// `orchid_fields` is the structured subset lifted out of it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEvent {
    pub tenant_id: String,
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub data: Value,
    pub headers: BTreeMap<String, String>,
    pub orchid_fields: OrchidFields,
}

impl InboundEvent {
    /// Builds the T-in `InboundEvent` from a bus-delivered `StepBatchEvent`
    /// plus the transport envelope (topic/partition/offset/key) the consumer
    /// read it from.
    pub fn from_step_batch(
        event: &StepBatchEvent,
        topic: String,
        partition: i32,
        offset: i64,
        key: Option<String>,
        headers: BTreeMap<String, String>,
    ) -> Self {
        let data = serde_json::to_value(event).unwrap_or(Value::Null);
        Self {
            tenant_id: event.tenant_id.clone(),
            topic,
            partition,
            offset,
            key,
            data,
            headers,
            orchid_fields: OrchidFields {
                tenant_id: event.tenant_id.clone(),
                plan_key: event.plan_key.clone(),
                execution_id: event.execution_id.clone(),
                config_id: event.config_id.clone(),
                integration: event.integration.clone(),
                step_path: event.step_path.clone(),
                status_code: event.status_code,
                response_body: event.response_body.clone(),
                trace_id: event.trace_id.clone(),
                span_id: event.span_id.clone(),
            },
        }
    }

    /// Builds the passthrough-shaped `InboundEvent` for a `LifecycleEvent`:
    /// `data.type` carries `"execution.started"`/`"execution.completed"` so
    /// the dispatch pipeline's passthrough check
    /// recognizes and republishes it without attempting to match bindings.
    pub fn from_lifecycle(event: &LifecycleEvent, topic: String, partition: i32, offset: i64) -> Self {
        let type_str = match event.event_type {
            LifecycleEventType::ExecutionStarted => "execution.started",
            LifecycleEventType::ExecutionCompleted => "execution.completed",
        };
        let mut data = serde_json::to_value(event).unwrap_or(Value::Null);
        if let Value::Object(ref mut map) = data {
            map.insert("type".to_string(), Value::String(type_str.to_string()));
        }
        Self {
            tenant_id: event.tenant_id.clone(),
            topic,
            partition,
            offset,
            key: Some(event.kafka_key()),
            data,
            headers: BTreeMap::new(),
            orchid_fields: OrchidFields {
                tenant_id: event.tenant_id.clone(),
                plan_key: event.plan_key.clone(),
                execution_id: event.execution_id.clone(),
                config_id: event.config_id.clone(),
                integration: event.integration.clone(),
                step_path: String::new(),
                status_code: 0,
                response_body: Value::Null,
                trace_id: None,
                span_id: None,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchidFields {
    pub tenant_id: String,
    pub plan_key: String,
    pub execution_id: String,
    pub config_id: String,
    pub integration: String,
    pub step_path: String,
    pub status_code: u16,
    /// Raw JSON bytes of the response body, as emitted by the step-batch event.
    pub response_body: Value,
    pub trace_id: Option<String>,
    pub span_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_object_as_single_element_array() {
        let wrapped = StepBatchEvent::wrap_response_body(serde_json::json!({"a": 1}));
        assert_eq!(wrapped, serde_json::json!([{"a": 1}]));
    }

    #[test]
    fn wraps_scalar_as_value_object() {
        let wrapped = StepBatchEvent::wrap_response_body(serde_json::json!(42));
        assert_eq!(wrapped, serde_json::json!([{"value": 42}]));
    }

    #[test]
    fn passes_arrays_through() {
        let wrapped = StepBatchEvent::wrap_response_body(serde_json::json!([1, 2]));
        assert_eq!(wrapped, serde_json::json!([1, 2]));
    }

    fn sample_step_batch() -> StepBatchEvent {
        StepBatchEvent {
            tenant_id: "t1".into(),
            integration: "hubspot".into(),
            plan_key: "sync_contacts".into(),
            config_id: "cfg1".into(),
            execution_id: "exec1".into(),
            step_path: "root".into(),
            timestamp: chrono::Utc::now(),
            trace_id: Some("trace1".into()),
            span_id: None,
            request_url: "https://api.example/x".into(),
            request_method: "GET".into(),
            request_headers: None,
            status_code: 200,
            response_body: serde_json::json!([{"a": 1}]),
            response_headers: None,
            response_size: 10,
            duration_ms: 5,
            extracted_data: None,
        }
    }

    #[test]
    fn from_step_batch_lifts_orchid_fields() {
        let event = sample_step_batch();
        let inbound = InboundEvent::from_step_batch(
            &event,
            "meadow.step_batch.t1".into(),
            0,
            42,
            Some("k1".into()),
            BTreeMap::new(),
        );
        assert_eq!(inbound.tenant_id, "t1");
        assert_eq!(inbound.orchid_fields.plan_key, "sync_contacts");
        assert_eq!(inbound.orchid_fields.status_code, 200);
        assert_eq!(inbound.orchid_fields.response_body, serde_json::json!([{"a": 1}]));
        assert!(inbound.data.get("type").is_none());
    }

    #[test]
    fn from_lifecycle_sets_passthrough_type() {
        let event = LifecycleEvent {
            event_type: LifecycleEventType::ExecutionStarted,
            tenant_id: "t1".into(),
            integration: "hubspot".into(),
            plan_key: "sync_contacts".into(),
            config_id: "cfg1".into(),
            execution_id: "exec1".into(),
            status: "running".into(),
            timestamp: chrono::Utc::now(),
        };
        let inbound = InboundEvent::from_lifecycle(&event, "meadow.lifecycle.t1".into(), 0, 7);
        assert_eq!(inbound.data["type"], "execution.started");
        assert_eq!(inbound.key, Some("t1:exec1".to_string()));
    }
}
