//! Error type for the Redis-backed collaborator adapters.
//!
//! Every `meadow-core` repository trait returns `Result<_, String>`. This crate keeps its own typed error internally and
//! converts to `String` at the trait boundary via `.to_string()`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RedisStoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("record not found: {0}")]
    NotFound(String),
}
