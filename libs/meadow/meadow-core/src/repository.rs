//! Collaborator trait interfaces. These stand in for the
//! persistence layer, which is out of scope: no
//! `sea-orm`/`sqlx` entity lives in this workspace, only the contracts the
//! extractor/transformer core code calls through.

use crate::binding::Binding;
use crate::context::PersistentContext;
use crate::mapping::MappingDefinition;
use crate::output::OutputRecord;
use crate::plan::Plan;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

#[cfg(feature = "test-util")]
use mockall::automock;

/// Opaque per-(tenant,plan_key) config blob; shape owned by the caller.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PlanConfig {
    pub config_id: String,
    pub tenant_id: String,
    pub data: Value,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AuthFlow {
    pub flow_id: String,
    pub tenant_id: String,
    pub root_step: crate::plan::Step,
    pub token_path: String,
    pub expires_in_path: Option<String>,
    pub ttl_seconds: Option<u64>,
    pub header_name: String,
    /// e.g. `"Bearer {{token}}"`.
    pub header_format: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ExecutionStatus {
    Running,
    Succeeded,
    FailedPermanent,
    FailedTransient,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ExecutionRecord {
    pub execution_id: String,
    pub tenant_id: String,
    pub plan_key: String,
    pub config_id: String,
    pub status: ExecutionStatus,
    pub error_type: Option<String>,
    pub duration_ms: Option<u64>,
    pub api_calls: u32,
}

#[async_trait]
#[cfg_attr(feature = "test-util", automock)]
pub trait PlanRepository: Send + Sync {
    async fn get_by_key(&self, tenant_id: &str, plan_key: &str) -> Result<Option<Plan>, String>;
}

#[async_trait]
#[cfg_attr(feature = "test-util", automock)]
pub trait ConfigRepository: Send + Sync {
    async fn get_by_id(&self, tenant_id: &str, config_id: &str) -> Result<Option<PlanConfig>, String>;
}

#[async_trait]
#[cfg_attr(feature = "test-util", automock)]
pub trait AuthFlowRepository: Send + Sync {
    async fn get_by_id(&self, tenant_id: &str, flow_id: &str) -> Result<Option<AuthFlow>, String>;
}

#[async_trait]
#[cfg_attr(feature = "test-util", automock)]
pub trait ExecutionRepository: Send + Sync {
    async fn create(&self, record: ExecutionRecord) -> Result<(), String>;
    async fn mark_started(&self, execution_id: &str) -> Result<(), String>;
    async fn mark_completed(
        &self,
        execution_id: &str,
        status: ExecutionStatus,
        error_type: Option<String>,
        duration_ms: u64,
    ) -> Result<(), String>;
}

#[async_trait]
#[cfg_attr(feature = "test-util", automock)]
pub trait StatisticsRepository: Send + Sync {
    async fn record_execution(&self, tenant_id: &str, plan_key: &str, status: ExecutionStatus) -> Result<(), String>;
    async fn increment_api_calls(&self, tenant_id: &str, plan_key: &str, count: u32) -> Result<(), String>;
}

#[async_trait]
#[cfg_attr(feature = "test-util", automock)]
pub trait PlanContextRepository: Send + Sync {
    async fn get_by_plan_and_config(
        &self,
        tenant_id: &str,
        plan_key: &str,
        config_id: &str,
    ) -> Result<PersistentContext, String>;

    async fn upsert(
        &self,
        tenant_id: &str,
        plan_key: &str,
        config_id: &str,
        context: PersistentContext,
    ) -> Result<(), String>;
}

#[async_trait]
#[cfg_attr(feature = "test-util", automock)]
pub trait BindingRepository: Send + Sync {
    async fn list_enabled(&self, tenant_id: &str) -> Result<Vec<Binding>, String>;
}

#[async_trait]
#[cfg_attr(feature = "test-util", automock)]
pub trait MappingRepository: Send + Sync {
    async fn get_by_id(
        &self,
        tenant_id: &str,
        mapping_id: &str,
    ) -> Result<Option<MappingDefinition>, String>;
}

#[async_trait]
#[cfg_attr(feature = "test-util", automock)]
pub trait Producer: Send + Sync {
    async fn publish_to_topic(&self, topic: &str, record: OutputRecord) -> Result<(), String>;
    async fn publish_raw_to_topic(
        &self,
        topic: &str,
        key: Option<&str>,
        headers: Vec<(String, String)>,
        bytes: Vec<u8>,
    ) -> Result<(), String>;
}

/// RAII-ish lock release handle. Implementations release the lock on the
/// backing store when `release()` is called; dropping without releasing is
/// left to the implementation's own TTL expiry as a backstop.
#[async_trait]
pub trait LockGuard: Send + Sync {
    async fn release(self: Box<Self>);
}

#[async_trait]
#[cfg_attr(feature = "test-util", automock)]
pub trait DistributedLock: Send + Sync {
    /// Acquire the lock, retrying until `ttl` elapses. Returns `None` on timeout.
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<Option<Box<dyn LockGuard>>, String>;
}
