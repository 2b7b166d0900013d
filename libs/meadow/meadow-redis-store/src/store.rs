//! Minimal JSON-blob-per-key helpers shared by every repository adapter.
//!
//! Each repository in this crate is a thin wrapper over a handful of Redis
//! keys; there is no query layer, no secondary index beyond what's spelled
//! out per adapter, and no migration story. This mirrors the DLQ manager's
//! own style in `meadow-stream-worker` (`redis::cmd` calls against a plain
//! key scheme) rather than introducing a second storage crate.

use crate::error::RedisStoreError;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};

#[derive(Clone)]
pub struct RedisJsonStore {
    redis: ConnectionManager,
}

impl RedisJsonStore {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    pub fn connection(&self) -> ConnectionManager {
        self.redis.clone()
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, RedisStoreError> {
        let mut conn = self.redis.clone();
        let raw: Option<String> = conn.get(key).await?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<(), RedisStoreError> {
        let mut conn = self.redis.clone();
        let json = serde_json::to_string(value)?;
        let _: () = conn.set(key, json).await?;
        Ok(())
    }

    /// Add `member` to the set at `key` (used for per-tenant id indexes).
    pub async fn index_add(&self, key: &str, member: &str) -> Result<(), RedisStoreError> {
        let mut conn = self.redis.clone();
        let _: () = conn.sadd(key, member).await?;
        Ok(())
    }

    pub async fn index_members(&self, key: &str) -> Result<Vec<String>, RedisStoreError> {
        let mut conn = self.redis.clone();
        Ok(conn.smembers(key).await?)
    }

    pub async fn incr_by(&self, key: &str, amount: i64) -> Result<i64, RedisStoreError> {
        let mut conn = self.redis.clone();
        Ok(conn.incr(key, amount).await?)
    }
}
