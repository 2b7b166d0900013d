//! Bespoke per-tenant Redis Streams consumer.
//!
//! `meadow-stream-worker`'s `StreamConsumer` hard-codes a `"job"` field,
//! matching the wire format the job queue uses — not the `"data"`/`"key"`
//! plus flat-header format `RedisStreamPublisher::publish_raw_to_topic`
//! writes for step-batch/error/lifecycle topics. This module re-implements
//! the same consumer-group technique (`XGROUP ... MKSTREAM`, `XAUTOCLAIM` on
//! startup and periodically, `XREADGROUP`, `XACK`) against that wire format
//! instead, so one loop per tenant topic can feed a shared `DispatchPipeline`.

use meadow_core::{InboundEvent, LifecycleEvent, StepBatchEvent};
use meadow_transformer::DispatchPipeline;
use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Which event type a topic's entries deserialize as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicKind {
    /// `meadow.step_batch.{tenant}` and `meadow.step_errors.{tenant}` both
    /// carry `StepBatchEvent` payloads — the Plan Executor emits the same
    /// event shape to both, just under different topics and headers.
    StepBatch,
    /// `meadow.lifecycle.{tenant}` carries `LifecycleEvent` payloads.
    Lifecycle,
}

#[derive(Debug, Clone)]
pub struct TopicConsumerConfig {
    pub stream_name: String,
    pub consumer_group: String,
    pub consumer_id: String,
    pub kind: TopicKind,
    pub batch_size: usize,
    pub block_timeout_ms: u64,
    pub claim_idle_time_secs: u64,
    pub enable_dlq: bool,
}

impl TopicConsumerConfig {
    fn dlq_stream_name(&self) -> String {
        format!("{}:dlq", self.stream_name)
    }
}

/// Drives one Redis stream's entries through a shared [`DispatchPipeline`],
/// forever, until `shutdown` fires.
pub struct TopicConsumer {
    redis: ConnectionManager,
    config: TopicConsumerConfig,
    pipeline: Arc<DispatchPipeline>,
}

impl TopicConsumer {
    pub fn new(
        redis: ConnectionManager,
        config: TopicConsumerConfig,
        pipeline: Arc<DispatchPipeline>,
    ) -> Self {
        Self { redis, config, pipeline }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), String> {
        self.ensure_consumer_group().await?;
        let claimed = self.claim_all_pending_on_startup().await?;
        if claimed > 0 {
            info!(stream = %self.config.stream_name, claimed, "claimed pending entries on startup");
        }

        let mut claim_tick =
            tokio::time::interval(Duration::from_secs(self.config.claim_idle_time_secs.max(1)));
        claim_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = claim_tick.tick() => {
                    if let Err(e) = self.claim_abandoned().await {
                        warn!(stream = %self.config.stream_name, error = %e, "failed to claim abandoned entries");
                    }
                }
                result = self.read_new() => {
                    match result {
                        Ok(entries) => self.process_entries(entries).await,
                        Err(e) => {
                            warn!(stream = %self.config.stream_name, error = %e, "read failed, backing off");
                            tokio::time::sleep(Duration::from_millis(500)).await;
                        }
                    }
                }
            }
        }

        info!(stream = %self.config.stream_name, "consumer loop stopped");
        Ok(())
    }

    async fn ensure_consumer_group(&self) -> Result<(), String> {
        let mut conn = self.redis.clone();
        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => {
                info!(group = %self.config.consumer_group, stream = %self.config.stream_name, "created consumer group");
                Ok(())
            }
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(e.to_string()),
        }
    }

    async fn claim_all_pending_on_startup(&self) -> Result<usize, String> {
        let mut conn = self.redis.clone();
        let mut total = 0usize;
        let mut start_id = "0-0".to_string();

        loop {
            let result: redis::Value = redis::cmd("XAUTOCLAIM")
                .arg(&self.config.stream_name)
                .arg(&self.config.consumer_group)
                .arg(&self.config.consumer_id)
                .arg(0)
                .arg(&start_id)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await
                .map_err(|e| e.to_string())?;

            let Some((next_id, count)) = parse_autoclaim_reply(&result) else {
                break;
            };
            total += count;
            if next_id == "0-0" || count == 0 {
                break;
            }
            start_id = next_id;
        }

        Ok(total)
    }

    async fn claim_abandoned(&self) -> Result<usize, String> {
        let mut conn = self.redis.clone();
        let idle_ms = self.config.claim_idle_time_secs * 1000;

        let result: redis::Value = redis::cmd("XAUTOCLAIM")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(&self.config.consumer_id)
            .arg(idle_ms)
            .arg("0-0")
            .arg("COUNT")
            .arg(50)
            .query_async(&mut conn)
            .await
            .map_err(|e| e.to_string())?;

        Ok(parse_autoclaim_reply(&result).map(|(_, count)| count).unwrap_or(0))
    }

    async fn read_new(&self) -> Result<Vec<(String, HashMap<String, redis::Value>)>, String> {
        let mut conn = self.redis.clone();
        let opts = StreamReadOptions::default()
            .group(&self.config.consumer_group, &self.config.consumer_id)
            .count(self.config.batch_size)
            .block(self.config.block_timeout_ms as usize);

        let result: Result<StreamReadReply, _> = conn
            .xread_options(&[&self.config.stream_name], &[">"], &opts)
            .await;

        match result {
            Ok(reply) => Ok(reply
                .keys
                .into_iter()
                .flat_map(|k| k.ids)
                .map(|msg| (msg.id, msg.map))
                .collect()),
            Err(e) => {
                let err = e.to_string().to_lowercase();
                if err.contains("timeout") || err.contains("nil") {
                    Ok(Vec::new())
                } else {
                    Err(e.to_string())
                }
            }
        }
    }

    async fn process_entries(&self, entries: Vec<(String, HashMap<String, redis::Value>)>) {
        for (message_id, fields) in entries {
            match self.parse_entry(&message_id, &fields) {
                Ok(event) => self.dispatch(&message_id, event).await,
                Err(e) => {
                    warn!(stream = %self.config.stream_name, message_id = %message_id, error = %e, "dropping unparseable entry");
                    self.move_to_dlq(&message_id, &fields, &e).await;
                    self.ack(&message_id).await;
                }
            }
        }
    }

    async fn dispatch(&self, message_id: &str, event: InboundEvent) {
        match self.pipeline.process(&event).await {
            Ok(()) => self.ack(message_id).await,
            Err(e) => {
                warn!(
                    stream = %self.config.stream_name,
                    message_id = %message_id,
                    error = %e,
                    "dispatch failed, leaving entry pending for retry"
                );
            }
        }
    }

    fn parse_entry(
        &self,
        message_id: &str,
        fields: &HashMap<String, redis::Value>,
    ) -> Result<InboundEvent, String> {
        let data = fields
            .get("data")
            .ok_or_else(|| "missing 'data' field".to_string())
            .and_then(value_to_bytes)?;
        let key = fields.get("key").and_then(|v| value_to_string(v).ok());
        let headers: BTreeMap<String, String> = fields
            .iter()
            .filter(|(name, _)| name.as_str() != "data" && name.as_str() != "key")
            .filter_map(|(name, v)| value_to_string(v).ok().map(|s| (name.clone(), s)))
            .collect();
        let offset = parse_offset(message_id);

        match self.config.kind {
            TopicKind::StepBatch => {
                let event: StepBatchEvent = serde_json::from_slice(&data)
                    .map_err(|e| format!("invalid step-batch payload: {e}"))?;
                Ok(InboundEvent::from_step_batch(
                    &event,
                    self.config.stream_name.clone(),
                    0,
                    offset,
                    key,
                    headers,
                ))
            }
            TopicKind::Lifecycle => {
                let event: LifecycleEvent = serde_json::from_slice(&data)
                    .map_err(|e| format!("invalid lifecycle payload: {e}"))?;
                Ok(InboundEvent::from_lifecycle(&event, self.config.stream_name.clone(), 0, offset))
            }
        }
    }

    async fn ack(&self, message_id: &str) {
        let mut conn = self.redis.clone();
        let result: Result<(), redis::RedisError> = conn
            .xack(&self.config.stream_name, &self.config.consumer_group, &[message_id])
            .await;
        if let Err(e) = result {
            warn!(stream = %self.config.stream_name, message_id = %message_id, error = %e, "failed to ack entry");
        } else {
            debug!(stream = %self.config.stream_name, message_id = %message_id, "acked entry");
        }
    }

    async fn move_to_dlq(&self, message_id: &str, fields: &HashMap<String, redis::Value>, error: &str) {
        if !self.config.enable_dlq {
            return;
        }
        let raw: BTreeMap<String, String> = fields
            .iter()
            .filter_map(|(k, v)| value_to_string(v).ok().map(|s| (k.clone(), s)))
            .collect();
        let entry = serde_json::json!({
            "original_stream_id": message_id,
            "stream": self.config.stream_name,
            "error": error,
            "raw_fields": raw,
            "failed_at": chrono::Utc::now().to_rfc3339(),
        });
        let mut conn = self.redis.clone();
        let result: Result<String, redis::RedisError> = redis::cmd("XADD")
            .arg(self.config.dlq_stream_name())
            .arg("*")
            .arg("data")
            .arg(entry.to_string())
            .query_async(&mut conn)
            .await;
        if let Err(e) = result {
            warn!(message_id = %message_id, error = %e, "failed to write entry to dlq");
        }
    }
}

fn parse_autoclaim_reply(value: &redis::Value) -> Option<(String, usize)> {
    let redis::Value::Array(arr) = value else { return None };
    if arr.len() < 2 {
        return None;
    }
    let redis::Value::BulkString(next_id) = &arr[0] else { return None };
    let next_id = String::from_utf8_lossy(next_id).to_string();
    let redis::Value::Array(messages) = &arr[1] else { return None };
    Some((next_id, messages.len()))
}

fn parse_offset(message_id: &str) -> i64 {
    message_id.split('-').next().and_then(|s| s.parse().ok()).unwrap_or(0)
}

fn value_to_bytes(value: &redis::Value) -> Result<Vec<u8>, String> {
    match value {
        redis::Value::BulkString(bytes) => Ok(bytes.clone()),
        redis::Value::SimpleString(s) => Ok(s.as_bytes().to_vec()),
        other => Err(format!("unexpected field value type: {other:?}")),
    }
}

fn value_to_string(value: &redis::Value) -> Result<String, String> {
    value_to_bytes(value).map(|b| String::from_utf8_lossy(&b).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_parses_the_millisecond_component_of_a_stream_id() {
        assert_eq!(parse_offset("1690000000000-3"), 1690000000000);
        assert_eq!(parse_offset("garbage"), 0);
    }

    #[test]
    fn autoclaim_reply_extracts_next_id_and_count() {
        let value = redis::Value::Array(vec![
            redis::Value::BulkString(b"0-0".to_vec()),
            redis::Value::Array(vec![redis::Value::Nil, redis::Value::Nil]),
            redis::Value::Array(vec![]),
        ]);
        assert_eq!(parse_autoclaim_reply(&value), Some(("0-0".to_string(), 2)));
    }

    #[test]
    fn value_to_string_decodes_bulk_string() {
        let value = redis::Value::BulkString(b"tenant-1".to_vec());
        assert_eq!(value_to_string(&value).unwrap(), "tenant-1");
    }
}
