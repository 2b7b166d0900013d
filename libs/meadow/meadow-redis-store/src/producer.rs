//! Redis Streams-backed `Producer`: `XADD`s to whatever topic
//! name the caller passes, rather than the single fixed stream
//! `stream_worker::StreamProducer` is built around — step-batch/error/
//! lifecycle/output topics are all derived per-tenant at runtime, so the
//! stream name can't be a compile-time `StreamDef` constant here.

use async_trait::async_trait;
use meadow_core::{OutputRecord, Producer};
use redis::aio::ConnectionManager;

pub struct RedisStreamPublisher {
    redis: ConnectionManager,
}

impl RedisStreamPublisher {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl Producer for RedisStreamPublisher {
    async fn publish_to_topic(&self, topic: &str, record: OutputRecord) -> Result<(), String> {
        let json = serde_json::to_string(&record).map_err(|e| e.to_string())?;
        let mut conn = self.redis.clone();
        redis::cmd("XADD")
            .arg(topic)
            .arg("*")
            .arg("record")
            .arg(json)
            .query_async::<String>(&mut conn)
            .await
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    async fn publish_raw_to_topic(
        &self,
        topic: &str,
        key: Option<&str>,
        headers: Vec<(String, String)>,
        bytes: Vec<u8>,
    ) -> Result<(), String> {
        let mut cmd = redis::cmd("XADD");
        cmd.arg(topic).arg("*").arg("data").arg(bytes);
        if let Some(key) = key {
            cmd.arg("key").arg(key);
        }
        for (name, value) in headers {
            cmd.arg(name).arg(value);
        }
        let mut conn = self.redis.clone();
        cmd.query_async::<String>(&mut conn)
            .await
            .map_err(|e| e.to_string())?;
        Ok(())
    }
}
