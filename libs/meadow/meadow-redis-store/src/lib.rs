//! Redis-backed implementations of the `meadow-core` collaborator traits
//!: plan/config/auth-flow/mapping/binding storage, execution
//! and statistics tracking, persistent per-plan context, a distributed lock,
//! and a topic publisher. None of this is a prescribed datastore — the core
//! traits are deliberately storage-agnostic — but Redis is already the
//! ambient datastore for the job queue and DLQ (`meadow-stream-worker`), so
//! this crate reuses it instead of wiring in an unrelated database.

mod error;
mod lock;
mod producer;
mod repositories;
mod store;

pub use error::RedisStoreError;
pub use lock::RedisDistributedLock;
pub use producer::RedisStreamPublisher;
pub use repositories::{
    RedisAuthFlowRepository, RedisBindingRepository, RedisConfigRepository,
    RedisExecutionRepository, RedisMappingRepository, RedisPlanContextRepository,
    RedisPlanRepository, RedisStatisticsRepository,
};
pub use store::RedisJsonStore;
