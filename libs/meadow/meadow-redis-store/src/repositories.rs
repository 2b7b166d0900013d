//! Redis-backed adapters for the `meadow-core` collaborator traits.
//!
//! Every adapter is a thin key scheme over [`crate::store::RedisJsonStore`].
//! None of this claims to be a real datastore: no transactions spanning more
//! than one key, no migrations, no query beyond the index sets spelled out
//! per adapter. It exists so the two `apps/meadow/*` binaries have something
//! concrete to run against without a database.

use crate::store::RedisJsonStore;
use async_trait::async_trait;
use meadow_core::{
    AuthFlow, AuthFlowRepository, Binding, BindingRepository, ConfigRepository, ExecutionRecord,
    ExecutionRepository, ExecutionStatus, MappingDefinition, MappingRepository, Plan,
    PlanConfig, PlanContextRepository, PlanRepository, PersistentContext, StatisticsRepository,
};
use tracing::warn;

fn plan_key(tenant_id: &str, plan_key: &str) -> String {
    format!("meadow:plan:{tenant_id}:{plan_key}")
}

fn config_key(tenant_id: &str, config_id: &str) -> String {
    format!("meadow:config:{tenant_id}:{config_id}")
}

fn auth_flow_key(tenant_id: &str, flow_id: &str) -> String {
    format!("meadow:auth_flow:{tenant_id}:{flow_id}")
}

fn execution_key(execution_id: &str) -> String {
    format!("meadow:execution:{execution_id}")
}

fn stats_key(tenant_id: &str, plan_key: &str, suffix: &str) -> String {
    format!("meadow:stats:{tenant_id}:{plan_key}:{suffix}")
}

fn plan_context_key(tenant_id: &str, plan_key: &str, config_id: &str) -> String {
    format!("meadow:plan_context:{tenant_id}:{plan_key}:{config_id}")
}

fn binding_key(tenant_id: &str, binding_id: &str) -> String {
    format!("meadow:binding:{tenant_id}:{binding_id}")
}

fn binding_index_key(tenant_id: &str) -> String {
    format!("meadow:binding_ids:{tenant_id}")
}

fn mapping_key(tenant_id: &str, mapping_id: &str) -> String {
    format!("meadow:mapping:{tenant_id}:{mapping_id}")
}

fn execution_status_str(status: ExecutionStatus) -> &'static str {
    match status {
        ExecutionStatus::Running => "running",
        ExecutionStatus::Succeeded => "succeeded",
        ExecutionStatus::FailedPermanent => "failed_permanent",
        ExecutionStatus::FailedTransient => "failed_transient",
    }
}

pub struct RedisPlanRepository {
    store: RedisJsonStore,
}

impl RedisPlanRepository {
    pub fn new(store: RedisJsonStore) -> Self {
        Self { store }
    }

    /// Seed/replace a plan definition; used by provisioning tooling, not by
    /// the worker itself.
    pub async fn put(&self, plan: &Plan) -> Result<(), String> {
        self.store
            .set(&plan_key(&plan.tenant_id, &plan.plan_key), plan)
            .await
            .map_err(|e| e.to_string())
    }
}

#[async_trait]
impl PlanRepository for RedisPlanRepository {
    async fn get_by_key(&self, tenant_id: &str, plan_key: &str) -> Result<Option<Plan>, String> {
        self.store
            .get(&self::plan_key(tenant_id, plan_key))
            .await
            .map_err(|e| e.to_string())
    }
}

pub struct RedisConfigRepository {
    store: RedisJsonStore,
}

impl RedisConfigRepository {
    pub fn new(store: RedisJsonStore) -> Self {
        Self { store }
    }

    pub async fn put(&self, config: &PlanConfig) -> Result<(), String> {
        self.store
            .set(&config_key(&config.tenant_id, &config.config_id), config)
            .await
            .map_err(|e| e.to_string())
    }
}

#[async_trait]
impl ConfigRepository for RedisConfigRepository {
    async fn get_by_id(&self, tenant_id: &str, config_id: &str) -> Result<Option<PlanConfig>, String> {
        self.store
            .get(&config_key(tenant_id, config_id))
            .await
            .map_err(|e| e.to_string())
    }
}

pub struct RedisAuthFlowRepository {
    store: RedisJsonStore,
}

impl RedisAuthFlowRepository {
    pub fn new(store: RedisJsonStore) -> Self {
        Self { store }
    }

    pub async fn put(&self, flow: &AuthFlow) -> Result<(), String> {
        self.store
            .set(&auth_flow_key(&flow.tenant_id, &flow.flow_id), flow)
            .await
            .map_err(|e| e.to_string())
    }
}

#[async_trait]
impl AuthFlowRepository for RedisAuthFlowRepository {
    async fn get_by_id(&self, tenant_id: &str, flow_id: &str) -> Result<Option<AuthFlow>, String> {
        self.store
            .get(&auth_flow_key(tenant_id, flow_id))
            .await
            .map_err(|e| e.to_string())
    }
}

pub struct RedisExecutionRepository {
    store: RedisJsonStore,
}

impl RedisExecutionRepository {
    pub fn new(store: RedisJsonStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ExecutionRepository for RedisExecutionRepository {
    async fn create(&self, record: ExecutionRecord) -> Result<(), String> {
        self.store
            .set(&execution_key(&record.execution_id), &record)
            .await
            .map_err(|e| e.to_string())
    }

    async fn mark_started(&self, execution_id: &str) -> Result<(), String> {
        // ExecutionRecord carries no "started_at" field of its own; the
        // record's presence plus `ExecutionStatus::Running` already express
        // "started". Just confirm it exists so callers see a real error if
        // `create` never landed.
        let found = self
            .store
            .get::<ExecutionRecord>(&execution_key(execution_id))
            .await
            .map_err(|e| e.to_string())?;
        if found.is_none() {
            warn!(execution_id, "mark_started: no execution record on file");
        }
        Ok(())
    }

    async fn mark_completed(
        &self,
        execution_id: &str,
        status: ExecutionStatus,
        error_type: Option<String>,
        duration_ms: u64,
    ) -> Result<(), String> {
        let mut record = self
            .store
            .get::<ExecutionRecord>(&execution_key(execution_id))
            .await
            .map_err(|e| e.to_string())?
            .unwrap_or(ExecutionRecord {
                execution_id: execution_id.to_string(),
                tenant_id: String::new(),
                plan_key: String::new(),
                config_id: String::new(),
                status,
                error_type: None,
                duration_ms: None,
                api_calls: 0,
            });
        record.status = status;
        record.error_type = error_type;
        record.duration_ms = Some(duration_ms);
        self.store
            .set(&execution_key(execution_id), &record)
            .await
            .map_err(|e| e.to_string())
    }
}

pub struct RedisStatisticsRepository {
    store: RedisJsonStore,
}

impl RedisStatisticsRepository {
    pub fn new(store: RedisJsonStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl StatisticsRepository for RedisStatisticsRepository {
    async fn record_execution(&self, tenant_id: &str, plan_key: &str, status: ExecutionStatus) -> Result<(), String> {
        self.store
            .incr_by(&stats_key(tenant_id, plan_key, execution_status_str(status)), 1)
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    async fn increment_api_calls(&self, tenant_id: &str, plan_key: &str, count: u32) -> Result<(), String> {
        self.store
            .incr_by(&stats_key(tenant_id, plan_key, "api_calls"), count as i64)
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}

pub struct RedisPlanContextRepository {
    store: RedisJsonStore,
}

impl RedisPlanContextRepository {
    pub fn new(store: RedisJsonStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl PlanContextRepository for RedisPlanContextRepository {
    async fn get_by_plan_and_config(
        &self,
        tenant_id: &str,
        plan_key: &str,
        config_id: &str,
    ) -> Result<PersistentContext, String> {
        let found = self
            .store
            .get::<PersistentContext>(&plan_context_key(tenant_id, plan_key, config_id))
            .await
            .map_err(|e| e.to_string())?;
        Ok(found.unwrap_or_default())
    }

    async fn upsert(
        &self,
        tenant_id: &str,
        plan_key: &str,
        config_id: &str,
        context: PersistentContext,
    ) -> Result<(), String> {
        self.store
            .set(&plan_context_key(tenant_id, plan_key, config_id), &context)
            .await
            .map_err(|e| e.to_string())
    }
}

pub struct RedisBindingRepository {
    store: RedisJsonStore,
}

impl RedisBindingRepository {
    pub fn new(store: RedisJsonStore) -> Self {
        Self { store }
    }

    /// Seed/replace a binding and index it under its tenant.
    pub async fn put(&self, binding: &Binding) -> Result<(), String> {
        self.store
            .index_add(&binding_index_key(&binding.tenant_id), &binding.binding_id)
            .await
            .map_err(|e| e.to_string())?;
        self.store
            .set(&binding_key(&binding.tenant_id, &binding.binding_id), binding)
            .await
            .map_err(|e| e.to_string())
    }
}

#[async_trait]
impl BindingRepository for RedisBindingRepository {
    async fn list_enabled(&self, tenant_id: &str) -> Result<Vec<Binding>, String> {
        let ids = self
            .store
            .index_members(&binding_index_key(tenant_id))
            .await
            .map_err(|e| e.to_string())?;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(binding) = self
                .store
                .get::<Binding>(&binding_key(tenant_id, &id))
                .await
                .map_err(|e| e.to_string())?
            {
                if binding.enabled {
                    out.push(binding);
                }
            }
        }
        Ok(out)
    }
}

pub struct RedisMappingRepository {
    store: RedisJsonStore,
}

impl RedisMappingRepository {
    pub fn new(store: RedisJsonStore) -> Self {
        Self { store }
    }

    pub async fn put(&self, mapping: &MappingDefinition) -> Result<(), String> {
        self.store
            .set(&mapping_key(&mapping.tenant_id, &mapping.mapping_id), mapping)
            .await
            .map_err(|e| e.to_string())
    }
}

#[async_trait]
impl MappingRepository for RedisMappingRepository {
    async fn get_by_id(&self, tenant_id: &str, mapping_id: &str) -> Result<Option<MappingDefinition>, String> {
        self.store
            .get(&mapping_key(tenant_id, mapping_id))
            .await
            .map_err(|e| e.to_string())
    }
}
