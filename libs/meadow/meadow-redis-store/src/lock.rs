//! Redis-backed `DistributedLock`: serializes concurrent
//! executions of the same `(plan_key, config_id)` persistent context.
//!
//! `SET key value NX PX ttl` for acquisition, a Lua compare-and-delete for
//! release so a lock can't be released by a holder whose TTL already
//! expired and was re-acquired by someone else.

use async_trait::async_trait;
use meadow_core::{DistributedLock, LockGuard};
use redis::aio::ConnectionManager;
use std::time::Duration;
use tokio::time::sleep;
use uuid::Uuid;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

pub struct RedisDistributedLock {
    redis: ConnectionManager,
}

impl RedisDistributedLock {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl DistributedLock for RedisDistributedLock {
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<Option<Box<dyn LockGuard>>, String> {
        let token = Uuid::new_v4().to_string();
        let redis_key = format!("meadow:lock:{key}");
        let deadline = tokio::time::Instant::now() + ttl;
        let mut conn = self.redis.clone();

        loop {
            let acquired: bool = redis::cmd("SET")
                .arg(&redis_key)
                .arg(&token)
                .arg("NX")
                .arg("PX")
                .arg(ttl.as_millis() as u64)
                .query_async::<Option<String>>(&mut conn)
                .await
                .map_err(|e| e.to_string())?
                .is_some();

            if acquired {
                return Ok(Some(Box::new(RedisLockGuard {
                    redis: self.redis.clone(),
                    key: redis_key,
                    token,
                })));
            }

            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            sleep(POLL_INTERVAL).await;
        }
    }
}

struct RedisLockGuard {
    redis: ConnectionManager,
    key: String,
    token: String,
}

#[async_trait]
impl LockGuard for RedisLockGuard {
    async fn release(self: Box<Self>) {
        let mut conn = self.redis.clone();
        let script = redis::Script::new(RELEASE_SCRIPT);
        let result: Result<i64, _> = script
            .key(&self.key)
            .arg(&self.token)
            .invoke_async(&mut conn)
            .await;
        if let Err(e) = result {
            tracing::warn!(key = %self.key, error = %e, "failed to release distributed lock");
        }
    }
}
