//! Dispatch pipeline: binds an inbound step-batch event to
//! its matching bindings, runs each match's mapping, and publishes output or
//! error records.

use crate::binding_matcher::BindingMatcher;
use crate::mapping_cache::MappingCache;
use crate::mapping_executor::MappingBufferPool;
use chrono::Utc;
use meadow_core::{
    is_entity_shaped, Binding, ErrorRecordData, ErrorRecordInput, InboundEvent, OutputRecord, OutputSource,
    OutputSourceType, Producer,
};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("failed to publish output record: {0}")]
    PublishFailed(String),
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DispatchStats {
    pub messages_processed: u64,
    pub messages_matched: u64,
    pub messages_failed: u64,
    pub bindings_loaded: u64,
    pub tenants_active: u64,
}

#[derive(Default)]
struct Counters {
    processed: AtomicU64,
    matched: AtomicU64,
    failed: AtomicU64,
    bindings_loaded: AtomicU64,
    tenants_active: AtomicU64,
}

pub struct DispatchPipeline {
    matcher: Arc<BindingMatcher>,
    mapping_cache: Arc<MappingCache>,
    producer: Arc<dyn Producer>,
    buffers: MappingBufferPool,
    error_topic: String,
    passthrough_topic: Option<String>,
    counters: Counters,
    seen_tenants: std::sync::Mutex<std::collections::HashSet<String>>,
}

impl DispatchPipeline {
    pub fn new(
        matcher: Arc<BindingMatcher>,
        mapping_cache: Arc<MappingCache>,
        producer: Arc<dyn Producer>,
        error_topic: impl Into<String>,
    ) -> Self {
        Self {
            matcher,
            mapping_cache,
            producer,
            buffers: MappingBufferPool::new(),
            error_topic: error_topic.into(),
            passthrough_topic: None,
            counters: Counters::default(),
            seen_tenants: std::sync::Mutex::new(std::collections::HashSet::new()),
        }
    }

    /// Configures the topic lifecycle events are republished to untouched
    ///. Without one, lifecycle events are just
    /// recognized and dropped — there is nowhere to put them.
    pub fn with_passthrough_topic(mut self, topic: impl Into<String>) -> Self {
        self.passthrough_topic = Some(topic.into());
        self
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            messages_processed: self.counters.processed.load(Ordering::Relaxed),
            messages_matched: self.counters.matched.load(Ordering::Relaxed),
            messages_failed: self.counters.failed.load(Ordering::Relaxed),
            bindings_loaded: self.counters.bindings_loaded.load(Ordering::Relaxed),
            tenants_active: self.counters.tenants_active.load(Ordering::Relaxed),
        }
    }

    /// Runs the full pipeline for one inbound event. Per-match mapping
    /// failures are routed to the error topic and do not fail the call;
    /// only a producer-level publish failure is surfaced as an `Err`, since
    /// at that point there is nowhere left to record the failure.
    pub async fn process(&self, event: &InboundEvent) -> Result<(), DispatchError> {
        self.counters.processed.fetch_add(1, Ordering::Relaxed);
        self.track_tenant(&event.tenant_id);

        if is_lifecycle_passthrough(&event.data) {
            debug!(tenant_id = %event.tenant_id, "passthrough: lifecycle event carries no mapping");
            return self.republish_passthrough(event).await;
        }

        let items: Vec<Value> = match &event.orchid_fields.response_body {
            Value::Array(items) => items.clone(),
            other => vec![other.clone()],
        };
        if items.is_empty() {
            return Ok(());
        }

        let was_loaded = self.matcher.is_loaded(&event.tenant_id).await;
        if let Err(e) = self.matcher.ensure_loaded(&event.tenant_id).await {
            warn!(tenant_id = %event.tenant_id, error = %e, "failed to load bindings, proceeding with none");
        } else if !was_loaded {
            self.counters.bindings_loaded.fetch_add(1, Ordering::Relaxed);
        }
        let matches = self
            .matcher
            .match_event(
                &event.tenant_id,
                &event.orchid_fields.integration,
                &event.orchid_fields.plan_key,
                event.orchid_fields.status_code,
            )
            .await;
        if matches.is_empty() {
            return Ok(());
        }
        self.counters.matched.fetch_add(1, Ordering::Relaxed);

        for item in &items {
            for binding_match in &matches {
                self.dispatch_one(event, item, &binding_match.binding).await?;
            }
        }
        Ok(())
    }

    fn track_tenant(&self, tenant_id: &str) {
        let mut seen = self.seen_tenants.lock().unwrap();
        if seen.insert(tenant_id.to_string()) {
            self.counters.tenants_active.fetch_add(1, Ordering::Relaxed);
        }
    }

    async fn republish_passthrough(&self, event: &InboundEvent) -> Result<(), DispatchError> {
        let Some(topic) = &self.passthrough_topic else {
            return Ok(());
        };
        let type_str = event.data.get("type").and_then(Value::as_str).unwrap_or("").to_string();
        let headers = vec![
            ("tenant_id".to_string(), event.tenant_id.clone()),
            ("plan_key".to_string(), event.orchid_fields.plan_key.clone()),
            ("execution_id".to_string(), event.orchid_fields.execution_id.clone()),
            ("type".to_string(), type_str),
        ];
        let bytes = serde_json::to_vec(&event.data).map_err(|e| DispatchError::PublishFailed(e.to_string()))?;
        self.producer
            .publish_raw_to_topic(topic, event.key.as_deref(), headers, bytes)
            .await
            .map_err(DispatchError::PublishFailed)
    }

    async fn dispatch_one(&self, event: &InboundEvent, item: &Value, binding: &Binding) -> Result<(), DispatchError> {
        let Some(output_topic) = &binding.output_topic else {
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
            return self
                .publish_error(event, "output_topic_missing", "binding has no output_topic", item, binding)
                .await;
        };

        let mapping = match self.mapping_cache.get(&event.tenant_id, &binding.mapping_id).await {
            Ok(mapping) => mapping,
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                return self.publish_error(event, "load_mapping", &e.to_string(), item, binding).await;
            }
        };

        let mut buffer = self.buffers.acquire();
        let exec_result = mapping.execute_into(item, &mut buffer);
        self.buffers.release(buffer);
        let result = match exec_result {
            Ok(result) => result,
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                return self.publish_error(event, "execute_mapping", &e.to_string(), item, binding).await;
            }
        };

        for data in split_batch_records(result.data) {
            let record = OutputRecord {
                source: OutputSource {
                    source_type: OutputSourceType::Orchid,
                    integration: event.orchid_fields.integration.clone(),
                    tenant_id: event.tenant_id.clone(),
                    key: event.key.clone(),
                    execution_id: event.orchid_fields.execution_id.clone(),
                    config_id: event.orchid_fields.config_id.clone(),
                },
                binding_id: binding.binding_id.clone(),
                mapping_id: mapping.mapping_id.clone(),
                mapping_version: mapping.version,
                timestamp: Utc::now(),
                data,
                trace_id: event.orchid_fields.trace_id.clone(),
                span_id: event.orchid_fields.span_id.clone(),
            };
            if let Err(e) = self.producer.publish_to_topic(output_topic, record).await {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                self.publish_error(event, "publish_output", &e, item, binding).await?;
            }
        }
        Ok(())
    }

    async fn publish_error(
        &self,
        event: &InboundEvent,
        stage: &str,
        error: &str,
        item: &Value,
        binding: &Binding,
    ) -> Result<(), DispatchError> {
        let error_data = ErrorRecordData {
            stage: stage.to_string(),
            error: error.to_string(),
            step_path: event.orchid_fields.step_path.clone(),
            input: ErrorRecordInput {
                topic: event.topic.clone(),
                partition: event.partition,
                offset: event.offset,
                key: event.key.clone(),
                data: item.clone(),
            },
        };
        let record = OutputRecord {
            source: OutputSource {
                source_type: OutputSourceType::Lotus,
                integration: event.orchid_fields.integration.clone(),
                tenant_id: event.tenant_id.clone(),
                key: event.key.clone(),
                execution_id: event.orchid_fields.execution_id.clone(),
                config_id: event.orchid_fields.config_id.clone(),
            },
            binding_id: binding.binding_id.clone(),
            mapping_id: binding.mapping_id.clone(),
            mapping_version: 0,
            timestamp: Utc::now(),
            data: serde_json::to_value(&error_data).unwrap_or(Value::Null),
            trace_id: event.orchid_fields.trace_id.clone(),
            span_id: event.orchid_fields.span_id.clone(),
        };
        self.producer
            .publish_to_topic(&self.error_topic, record)
            .await
            .map_err(DispatchError::PublishFailed)
    }
}

fn is_lifecycle_passthrough(data: &Value) -> bool {
    data.get("type")
        .and_then(Value::as_str)
        .map(|t| t.starts_with("execution."))
        .unwrap_or(false)
}

/// A mapping's output can carry entity/relationship-shaped records inside
/// one or more arrays — either the whole output is such an array, or it's
/// an object whose fields each hold one (e.g. `{"entities": [...],
/// "relationships": [...]}`). Every such array is flattened, in field
/// order, into a single ordered list and emitted as one record per
/// element; anything else is emitted as a single record.
fn split_batch_records(data: Value) -> Vec<Value> {
    if is_entity_array(&data) {
        if let Value::Array(items) = data {
            return items;
        }
        unreachable!("is_entity_array only returns true for Value::Array");
    }
    if let Value::Object(fields) = &data {
        let mut flattened = Vec::new();
        let mut any_entity_array = false;
        for value in fields.values() {
            if is_entity_array(value) {
                any_entity_array = true;
                if let Value::Array(items) = value {
                    flattened.extend(items.iter().cloned());
                }
            }
        }
        if any_entity_array {
            return flattened;
        }
    }
    vec![data]
}

/// Whether `value` is a non-empty array all of whose elements are
/// entity/relationship-shaped records.
fn is_entity_array(value: &Value) -> bool {
    matches!(value, Value::Array(items) if !items.is_empty() && items.iter().all(is_entity_shaped))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use meadow_core::{BindingFilter, MockBindingRepository, MockMappingRepository, MockProducer};
    use meadow_core::{ActionValueType, FieldSpec, MappingDefinition};
    use std::collections::BTreeMap;
    use std::sync::Mutex as StdMutex;

    fn inbound_event(response_body: Value) -> InboundEvent {
        InboundEvent {
            tenant_id: "t1".into(),
            topic: "meadow.step_batch.t1".into(),
            partition: 0,
            offset: 42,
            key: Some("k1".into()),
            data: serde_json::json!({"type": "step_batch"}),
            headers: BTreeMap::new(),
            orchid_fields: meadow_core::OrchidFields {
                tenant_id: "t1".into(),
                plan_key: "orders".into(),
                execution_id: "ex1".into(),
                config_id: "c1".into(),
                integration: "shopify".into(),
                step_path: "root".into(),
                status_code: 200,
                response_body,
                trace_id: None,
                span_id: None,
            },
        }
    }

    fn passthrough_mapping() -> MappingDefinition {
        MappingDefinition {
            tenant_id: "t1".into(),
            mapping_id: "m1".into(),
            version: 1,
            source_fields: vec![FieldSpec {
                id: "id".into(),
                path: "id".into(),
                value_type: ActionValueType::Any,
                nullable: true,
            }],
            target_fields: vec![FieldSpec {
                id: "id_out".into(),
                path: "id".into(),
                value_type: ActionValueType::Any,
                nullable: true,
            }],
            steps: vec![],
            links: vec![meadow_core::Link {
                source_field_id: "id".into(),
                target_field_id: "id_out".into(),
            }],
        }
    }

    fn binding() -> Binding {
        Binding {
            tenant_id: "t1".into(),
            binding_id: "b1".into(),
            mapping_id: "m1".into(),
            filter: BindingFilter::default(),
            output_topic: Some("orchid.out".into()),
            enabled: true,
        }
    }

    #[tokio::test]
    async fn matched_event_publishes_one_record_per_item() {
        let mut binding_repo = MockBindingRepository::new();
        binding_repo.expect_list_enabled().returning(|_| Ok(vec![binding()]));

        let mut mapping_repo = MockMappingRepository::new();
        mapping_repo
            .expect_get_by_id()
            .returning(|_, _| Ok(Some(passthrough_mapping())));

        let published = Arc::new(StdMutex::new(Vec::new()));
        let published_clone = published.clone();
        let mut producer = MockProducer::new();
        producer.expect_publish_to_topic().returning(move |topic, record| {
            published_clone.lock().unwrap().push((topic.to_string(), record.data));
            Ok(())
        });

        let pipeline = DispatchPipeline::new(
            Arc::new(BindingMatcher::new(Arc::new(binding_repo))),
            Arc::new(MappingCache::new(Arc::new(mapping_repo))),
            Arc::new(producer),
            "meadow.errors.t1",
        );

        let event = inbound_event(serde_json::json!([{"id": 1}, {"id": 2}]));
        pipeline.process(&event).await.unwrap();

        let records = published.lock().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].0, "orchid.out");
        assert_eq!(records[0].1, serde_json::json!({"id": 1}));
        assert_eq!(records[1].1, serde_json::json!({"id": 2}));
        assert_eq!(pipeline.stats().messages_matched, 1);
    }

    #[tokio::test]
    async fn missing_output_topic_routes_to_error_topic() {
        let mut binding_repo = MockBindingRepository::new();
        binding_repo.expect_list_enabled().returning(|_| {
            Ok(vec![Binding {
                output_topic: None,
                ..binding()
            }])
        });
        let mapping_repo = MockMappingRepository::new();

        let published = Arc::new(StdMutex::new(Vec::new()));
        let published_clone = published.clone();
        let mut producer = MockProducer::new();
        producer.expect_publish_to_topic().returning(move |topic, record| {
            published_clone.lock().unwrap().push((topic.to_string(), record.source.source_type));
            Ok(())
        });

        let pipeline = DispatchPipeline::new(
            Arc::new(BindingMatcher::new(Arc::new(binding_repo))),
            Arc::new(MappingCache::new(Arc::new(mapping_repo))),
            Arc::new(producer),
            "meadow.errors.t1",
        );

        let event = inbound_event(serde_json::json!([{"id": 1}]));
        pipeline.process(&event).await.unwrap();

        let records = published.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].0, "meadow.errors.t1");
        assert_eq!(records[0].1, meadow_core::OutputSourceType::Lotus);
    }

    #[tokio::test]
    async fn lifecycle_event_is_passthrough_and_never_mapped() {
        let binding_repo = MockBindingRepository::new();
        let mapping_repo = MockMappingRepository::new();
        let producer = MockProducer::new();

        let pipeline = DispatchPipeline::new(
            Arc::new(BindingMatcher::new(Arc::new(binding_repo))),
            Arc::new(MappingCache::new(Arc::new(mapping_repo))),
            Arc::new(producer),
            "meadow.errors.t1",
        );

        let mut event = inbound_event(Value::Null);
        event.data = serde_json::json!({"type": "execution.completed"});
        pipeline.process(&event).await.unwrap();
        assert_eq!(pipeline.stats().messages_processed, 1);
        assert_eq!(pipeline.stats().messages_matched, 0);
    }

    #[tokio::test]
    async fn entity_shaped_array_output_splits_into_multiple_records() {
        let def = MappingDefinition {
            tenant_id: "t1".into(),
            mapping_id: "m1".into(),
            version: 1,
            source_fields: vec![FieldSpec {
                id: "records".into(),
                path: "records".into(),
                value_type: ActionValueType::Array,
                nullable: true,
            }],
            target_fields: vec![FieldSpec {
                id: "records_out".into(),
                path: "records".into(),
                value_type: ActionValueType::Array,
                nullable: true,
            }],
            steps: vec![],
            links: vec![meadow_core::Link {
                source_field_id: "records".into(),
                target_field_id: "records_out".into(),
            }],
        };

        let mut binding_repo = MockBindingRepository::new();
        binding_repo.expect_list_enabled().returning(|_| Ok(vec![binding()]));
        let mut mapping_repo = MockMappingRepository::new();
        mapping_repo.expect_get_by_id().returning(move |_, _| Ok(Some(def.clone())));

        let published = Arc::new(StdMutex::new(Vec::new()));
        let published_clone = published.clone();
        let mut producer = MockProducer::new();
        producer.expect_publish_to_topic().returning(move |_, record| {
            published_clone.lock().unwrap().push(record.data);
            Ok(())
        });

        let pipeline = DispatchPipeline::new(
            Arc::new(BindingMatcher::new(Arc::new(binding_repo))),
            Arc::new(MappingCache::new(Arc::new(mapping_repo))),
            Arc::new(producer),
            "meadow.errors.t1",
        );

        // The compiled target nests the array under key "records", so
        // `target_raw` is an object, not a top-level array — split_batch_records
        // must still find the entity-shaped array inside it and flatten it.
        let event = inbound_event(serde_json::json!([{
            "records": [
                {"_entity_type": "order", "id": 1},
                {"_entity_type": "order", "id": 2}
            ]
        }]));
        pipeline.process(&event).await.unwrap();

        let records = published.lock().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], serde_json::json!({"_entity_type": "order", "id": 1}));
        assert_eq!(records[1], serde_json::json!({"_entity_type": "order", "id": 2}));
    }

    #[tokio::test]
    async fn entity_shaped_arrays_nested_under_multiple_fields_all_flatten() {
        let def = MappingDefinition {
            tenant_id: "t1".into(),
            mapping_id: "m1".into(),
            version: 1,
            source_fields: vec![
                FieldSpec {
                    id: "entities".into(),
                    path: "entities".into(),
                    value_type: ActionValueType::Array,
                    nullable: true,
                },
                FieldSpec {
                    id: "relationships".into(),
                    path: "relationships".into(),
                    value_type: ActionValueType::Array,
                    nullable: true,
                },
            ],
            target_fields: vec![
                FieldSpec {
                    id: "entities_out".into(),
                    path: "entities".into(),
                    value_type: ActionValueType::Array,
                    nullable: true,
                },
                FieldSpec {
                    id: "relationships_out".into(),
                    path: "relationships".into(),
                    value_type: ActionValueType::Array,
                    nullable: true,
                },
            ],
            steps: vec![],
            links: vec![
                meadow_core::Link {
                    source_field_id: "entities".into(),
                    target_field_id: "entities_out".into(),
                },
                meadow_core::Link {
                    source_field_id: "relationships".into(),
                    target_field_id: "relationships_out".into(),
                },
            ],
        };

        let mut binding_repo = MockBindingRepository::new();
        binding_repo.expect_list_enabled().returning(|_| Ok(vec![binding()]));
        let mut mapping_repo = MockMappingRepository::new();
        mapping_repo.expect_get_by_id().returning(move |_, _| Ok(Some(def.clone())));

        let published = Arc::new(StdMutex::new(Vec::new()));
        let published_clone = published.clone();
        let mut producer = MockProducer::new();
        producer.expect_publish_to_topic().returning(move |_, record| {
            published_clone.lock().unwrap().push(record.data);
            Ok(())
        });

        let pipeline = DispatchPipeline::new(
            Arc::new(BindingMatcher::new(Arc::new(binding_repo))),
            Arc::new(MappingCache::new(Arc::new(mapping_repo))),
            Arc::new(producer),
            "meadow.errors.t1",
        );

        let event = inbound_event(serde_json::json!([{
            "entities": [{"_entity_type": "user", "id": 1}],
            "relationships": [{"_relationship_type": "owns", "id": 2}]
        }]));
        pipeline.process(&event).await.unwrap();

        let records = published.lock().unwrap();
        assert_eq!(records.len(), 2);
    }
}
