//! Plan Executor: orchestrates one job end to end — loads
//! the plan/config, injects auth, drives the root step through its
//! `while` loop, delegates fan-out/sub-step/iterate_over handling, emits
//! one step-batch message per iteration, and persists context on clean
//! completion.

use crate::fan_out::{enrich_item, FanOutExecutor};
use crate::step_executor::{StepExecutor, StepExecutorOptions};
use chrono::Utc;
use meadow_auth::AuthManager;
use meadow_core::{
    ErrorCategory, ExecutionContext, ExecutionMeta, ExecutionRecord, ExecutionRepository,
    ExecutionStatus, LifecycleEvent, LifecycleEventType, MeadowError, Plan, PlanConfig,
};
use meadow_core::{
    AuthFlowRepository, ConfigRepository, DistributedLock, PlanContextRepository, PlanRepository,
    Producer, StatisticsRepository, StepBatchEvent,
};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A `plan_execution` job, already unwrapped from the job-queue envelope
/// (`meadow-stream-worker` handles delivery/ack; this is what it hands
/// down once a message validates as `Job { job_type: PlanExecution, .. }`).
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub execution_id: String,
    pub tenant_id: String,
    pub integration: String,
    pub plan_key: String,
    pub config_id: String,
    pub context_override: Option<Value>,
    pub parent_execution_id: Option<String>,
}

impl JobRequest {
    pub fn from_job(job: &meadow_core::Job) -> Self {
        Self {
            execution_id: Uuid::new_v4().to_string(),
            tenant_id: job.tenant_id.clone(),
            integration: job.payload.integration.clone(),
            plan_key: job.payload.plan_key.clone(),
            config_id: job.payload.config_id.clone(),
            context_override: job.payload.context_override.clone(),
            parent_execution_id: job.payload.parent_execution_id.clone(),
        }
    }
}

#[derive(Error, Debug)]
pub enum PlanExecutionError {
    #[error("plan not found: {tenant_id}/{plan_key}")]
    PlanNotFound { tenant_id: String, plan_key: String },

    #[error("plan disabled: {tenant_id}/{plan_key}")]
    PlanDisabled { tenant_id: String, plan_key: String },

    #[error("config not found: {tenant_id}/{config_id}")]
    ConfigNotFound { tenant_id: String, config_id: String },

    #[error("auth flow not found: {tenant_id}/{flow_id}")]
    AuthFlowNotFound { tenant_id: String, flow_id: String },

    #[error("could not acquire plan-context lock within the configured TTL")]
    LockTimedOut,

    #[error("plan execution deadline exceeded")]
    DeadlineExceeded,

    #[error(transparent)]
    Step(#[from] MeadowError),

    #[error("collaborator error: {0}")]
    Repository(String),
}

impl PlanExecutionError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            PlanExecutionError::PlanNotFound { .. }
            | PlanExecutionError::PlanDisabled { .. }
            | PlanExecutionError::ConfigNotFound { .. }
            | PlanExecutionError::AuthFlowNotFound { .. } => ErrorCategory::Permanent,
            PlanExecutionError::LockTimedOut | PlanExecutionError::DeadlineExceeded => {
                ErrorCategory::Transient
            }
            PlanExecutionError::Step(e) => e.category(),
            PlanExecutionError::Repository(_) => ErrorCategory::Transient,
        }
    }

    fn error_type(&self) -> String {
        match self {
            PlanExecutionError::PlanNotFound { .. } => "plan_not_found".to_string(),
            PlanExecutionError::PlanDisabled { .. } => "plan_disabled".to_string(),
            PlanExecutionError::ConfigNotFound { .. } => "config_not_found".to_string(),
            PlanExecutionError::AuthFlowNotFound { .. } => "auth_flow_not_found".to_string(),
            PlanExecutionError::LockTimedOut => "lock_timed_out".to_string(),
            PlanExecutionError::DeadlineExceeded => "deadline_exceeded".to_string(),
            PlanExecutionError::Step(e) => format!("{e:?}")
                .split_whitespace()
                .next()
                .unwrap_or("step_error")
                .trim_end_matches('(')
                .to_string(),
            PlanExecutionError::Repository(_) => "repository_error".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlanExecutorOptions {
    /// Upper bound on how long a single `wait_for_limit` call may block.
    pub max_rate_wait: Duration,
    /// Bounds any `while` loop.
    pub max_loops: u32,
    /// TTL for the distributed lock serializing concurrent executions of
    /// the same `(plan_key, config_id)` persistent context.
    pub lock_ttl: Duration,
    /// Topic namespace; step-batch/error/lifecycle topics are derived as
    /// `{prefix}.{kind}.{tenant_id}` — one topic per tenant cluster.
    pub topic_prefix: String,
}

impl Default for PlanExecutorOptions {
    fn default() -> Self {
        Self {
            max_rate_wait: Duration::from_secs(60),
            max_loops: 1000,
            lock_ttl: Duration::from_secs(30),
            topic_prefix: "meadow".to_string(),
        }
    }
}

impl PlanExecutorOptions {
    fn step_batch_topic(&self, tenant_id: &str) -> String {
        format!("{}.step_batch.{}", self.topic_prefix, tenant_id)
    }

    fn error_topic(&self, tenant_id: &str) -> String {
        format!("{}.step_errors.{}", self.topic_prefix, tenant_id)
    }

    fn lifecycle_topic(&self, tenant_id: &str) -> String {
        format!("{}.lifecycle.{}", self.topic_prefix, tenant_id)
    }
}

pub struct PlanExecutorDeps {
    pub plans: Arc<dyn PlanRepository>,
    pub configs: Arc<dyn ConfigRepository>,
    pub auth_flows: Arc<dyn AuthFlowRepository>,
    pub executions: Arc<dyn ExecutionRepository>,
    pub statistics: Arc<dyn StatisticsRepository>,
    pub plan_contexts: Arc<dyn PlanContextRepository>,
    pub producer: Arc<dyn Producer>,
    pub lock: Arc<dyn DistributedLock>,
    pub auth_manager: Arc<AuthManager>,
    pub step_executor: Arc<StepExecutor>,
    pub fan_out: Arc<FanOutExecutor>,
}

pub struct PlanExecutor {
    deps: PlanExecutorDeps,
    options: PlanExecutorOptions,
}

impl PlanExecutor {
    pub fn new(deps: PlanExecutorDeps, options: PlanExecutorOptions) -> Self {
        Self { deps, options }
    }

    pub async fn execute(&self, job: JobRequest) -> Result<(), PlanExecutionError> {
        let start = Instant::now();
        let record = ExecutionRecord {
            execution_id: job.execution_id.clone(),
            tenant_id: job.tenant_id.clone(),
            plan_key: job.plan_key.clone(),
            config_id: job.config_id.clone(),
            status: ExecutionStatus::Running,
            error_type: None,
            duration_ms: None,
            api_calls: 0,
        };
        if let Err(e) = self.deps.executions.create(record).await {
            warn!(error = %e, "failed to create execution record; continuing");
        }
        let _ = self.deps.executions.mark_started(&job.execution_id).await;

        self.emit_lifecycle(&job, LifecycleEventType::ExecutionStarted, "running")
            .await;

        let outcome = self.run(&job, start).await;

        let (status, error_type, api_calls) = match &outcome {
            Ok(calls) => (ExecutionStatus::Succeeded, None, *calls),
            Err((err, calls)) => {
                let status = match err.category() {
                    ErrorCategory::Permanent => ExecutionStatus::FailedPermanent,
                    _ => ExecutionStatus::FailedTransient,
                };
                (status, Some(err.error_type()), *calls)
            }
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        let _ = self
            .deps
            .executions
            .mark_completed(&job.execution_id, status, error_type.clone(), duration_ms)
            .await;
        let _ = self
            .deps
            .statistics
            .record_execution(&job.tenant_id, &job.plan_key, status)
            .await;
        let _ = self
            .deps
            .statistics
            .increment_api_calls(&job.tenant_id, &job.plan_key, api_calls)
            .await;

        self.emit_lifecycle(
            &job,
            LifecycleEventType::ExecutionCompleted,
            match status {
                ExecutionStatus::Succeeded => "succeeded",
                ExecutionStatus::FailedPermanent => "failed_permanent",
                ExecutionStatus::FailedTransient => "failed_transient",
                ExecutionStatus::Running => "running",
            },
        )
        .await;

        match outcome {
            Ok(_) => Ok(()),
            Err((err, _)) => Err(err),
        }
    }

    /// Returns `Ok(total_api_calls)` on clean completion, `Err((error,
    /// total_api_calls))` otherwise so the caller can still record
    /// statistics for a partially-completed run.
    async fn run(
        &self,
        job: &JobRequest,
        start: Instant,
    ) -> Result<u32, (PlanExecutionError, u32)> {
        let mut api_calls = 0u32;

        let plan = self
            .deps
            .plans
            .get_by_key(&job.tenant_id, &job.plan_key)
            .await
            .map_err(|e| (PlanExecutionError::Repository(e), api_calls))?
            .ok_or_else(|| {
                (
                    PlanExecutionError::PlanNotFound {
                        tenant_id: job.tenant_id.clone(),
                        plan_key: job.plan_key.clone(),
                    },
                    api_calls,
                )
            })?;
        if !plan.enabled {
            return Err((
                PlanExecutionError::PlanDisabled {
                    tenant_id: job.tenant_id.clone(),
                    plan_key: job.plan_key.clone(),
                },
                api_calls,
            ));
        }

        let config = self
            .deps
            .configs
            .get_by_id(&job.tenant_id, &job.config_id)
            .await
            .map_err(|e| (PlanExecutionError::Repository(e), api_calls))?
            .ok_or_else(|| {
                (
                    PlanExecutionError::ConfigNotFound {
                        tenant_id: job.tenant_id.clone(),
                        config_id: job.config_id.clone(),
                    },
                    api_calls,
                )
            })?;

        let lock_key = format!(
            "meadow:plan_context:{}:{}:{}",
            job.tenant_id, job.plan_key, job.config_id
        );
        let guard = self
            .deps
            .lock
            .acquire(&lock_key, self.options.lock_ttl)
            .await
            .map_err(|e| (PlanExecutionError::Repository(e), api_calls))?
            .ok_or((PlanExecutionError::LockTimedOut, api_calls))?;

        let run_result = self.run_locked(job, &plan, &config, start, &mut api_calls).await;

        guard.release().await;
        run_result.map(|()| api_calls).map_err(|e| (e, api_calls))
    }

    async fn run_locked(
        &self,
        job: &JobRequest,
        plan: &Plan,
        config: &PlanConfig,
        start: Instant,
        api_calls: &mut u32,
    ) -> Result<(), PlanExecutionError> {
        let persistent = self
            .deps
            .plan_contexts
            .get_by_plan_and_config(&job.tenant_id, &job.plan_key, &job.config_id)
            .await
            .map_err(PlanExecutionError::Repository)?;

        let meta = ExecutionMeta {
            tenant_id: job.tenant_id.clone(),
            plan_key: job.plan_key.clone(),
            config_id: job.config_id.clone(),
            execution_id: job.execution_id.clone(),
            step_path: "root".to_string(),
            loop_count: 0,
            retry_count: 0,
            nesting_level: 0,
        };
        let mut ctx = ExecutionContext::new(meta, config.data.clone(), persistent);
        if let Some(Value::Object(overrides)) = &job.context_override {
            for (k, v) in overrides {
                let _ = ctx.set_context_value(k, v.clone());
            }
        }

        if let Some(flow_id) = plan.root.auth_flow_id.clone() {
            let flow = self
                .deps
                .auth_flows
                .get_by_id(&job.tenant_id, &flow_id)
                .await
                .map_err(PlanExecutionError::Repository)?
                .ok_or_else(|| PlanExecutionError::AuthFlowNotFound {
                    tenant_id: job.tenant_id.clone(),
                    flow_id: flow_id.clone(),
                })?;
            let auth_ctx = self
                .deps
                .auth_manager
                .get_auth_context(&flow, &job.tenant_id, &job.config_id, config.data.clone())
                .await
                .map_err(|e| PlanExecutionError::Step(MeadowError::Internal(e.to_string())))?;
            ctx.auth = Some(serde_json::json!({
                "header_name": auth_ctx.header_name,
                "header_value": auth_ctx.header_value,
                "token": auth_ctx.token,
                "expires_at": auth_ctx.expires_at,
            }));
        }

        let deadline = plan.max_execution_seconds.map(Duration::from_secs);
        let step_opts = StepExecutorOptions {
            tenant_id: job.tenant_id.clone(),
            integration_id: job.integration.clone(),
            config_id: job.config_id.clone(),
            rate_limits: plan.rate_limits.clone(),
            max_rate_wait: self.options.max_rate_wait,
        };

        let mut loop_count = 0u32;
        loop {
            if loop_count >= self.options.max_loops {
                return Err(PlanExecutionError::Step(MeadowError::MaxLoopsExceeded(
                    self.options.max_loops,
                )));
            }
            if let Some(d) = deadline {
                if start.elapsed() > d {
                    return Err(PlanExecutionError::DeadlineExceeded);
                }
            }
            ctx.meta.loop_count = loop_count;

            let step = &plan.root;
            let result = self.deps.step_executor.execute(step, &mut ctx, &step_opts).await;
            *api_calls += 1;

            let mut force_error = false;
            let mut force_abort = result.should_abort;

            let response_body = if step.is_fan_out() {
                let fr = self
                    .deps
                    .fan_out
                    .execute(step, &ctx, &step_opts, plan.max_nesting_depth)
                    .await
                    .map_err(PlanExecutionError::Step)?;
                *api_calls += fr.total_items as u32;
                force_error = fr.items.iter().any(|o| o.context.fanout_policy_error);
                force_abort = force_abort || fr.abort_triggered;
                let items: Vec<Value> = fr
                    .items
                    .iter()
                    .map(|o| enrich_item(&o.item, &o.context.fanout))
                    .collect();
                Value::Array(items)
            } else if !step.sub_steps.is_empty() && step.iterate_over.is_none() {
                let mut extra_fields: BTreeMap<String, Value> = BTreeMap::new();
                for (i, sub) in step.sub_steps.iter().enumerate() {
                    let sub_result = self.deps.step_executor.execute(sub, &mut ctx, &step_opts).await;
                    *api_calls += 1;
                    if let Some(resp) = &sub_result.response {
                        extra_fields.insert(sub.step_id_or(&format!("sub_step_{i}")), resp.body.clone());
                    }
                    if sub_result.error.is_some() {
                        force_error = true;
                    }
                }
                let base = StepBatchEvent::wrap_response_body(
                    result.response.as_ref().map(|r| r.body.clone()).unwrap_or(Value::Null),
                );
                let enriched: Vec<Value> = base
                    .as_array()
                    .into_iter()
                    .flatten()
                    .map(|el| enrich_item(el, &extra_fields))
                    .collect();
                Value::Array(enriched)
            } else if let Some(expr) = &step.iterate_over {
                let tree = ctx.to_eval_tree();
                let items = meadow_expr::evaluate_slice(expr, &tree)
                    .map_err(|e| PlanExecutionError::Step(MeadowError::BadExpression(e.to_string())))?;
                Value::Array(items)
            } else {
                StepBatchEvent::wrap_response_body(
                    result.response.as_ref().map(|r| r.body.clone()).unwrap_or(Value::Null),
                )
            };

            if result.ignored {
                force_error = true;
            }
            let is_error_emission = force_error || result.error.is_some();

            if step.emits_to_kafka() {
                self.emit_step_batch(job, &ctx, step, &result, response_body, is_error_emission)
                    .await;
            }

            if force_abort {
                let status_code = result.response.as_ref().map(|r| r.status_code).unwrap_or(0);
                return Err(PlanExecutionError::Step(MeadowError::Aborted {
                    step_path: ctx.meta.step_path.clone(),
                    status_code,
                }));
            }

            if let Some(err) = result.error {
                return Err(PlanExecutionError::Step(err));
            }

            let tree = ctx.to_eval_tree();
            let while_truthy = step
                .r#while
                .as_deref()
                .map(|e| meadow_expr::evaluate_bool(e, &tree).unwrap_or(false))
                .unwrap_or(false);

            if while_truthy && !result.should_break {
                ctx.prev = result.response.map(|r| r.body);
                loop_count += 1;
                continue;
            }
            break;
        }

        self.deps
            .plan_contexts
            .upsert(&job.tenant_id, &job.plan_key, &job.config_id, ctx.context.clone())
            .await
            .map_err(PlanExecutionError::Repository)?;

        Ok(())
    }

    async fn emit_step_batch(
        &self,
        job: &JobRequest,
        ctx: &ExecutionContext,
        step: &meadow_core::Step,
        result: &crate::step_executor::StepResult,
        response_body: Value,
        is_error: bool,
    ) {
        let (status_code, response_headers, response_size, duration_ms) = match &result.response {
            Some(resp) => (
                resp.status_code,
                Some(resp.headers.clone()),
                response_body.to_string().len(),
                resp.duration.as_millis() as u64,
            ),
            None => (0, None, 0, 0),
        };

        let event = StepBatchEvent {
            tenant_id: job.tenant_id.clone(),
            integration: job.integration.clone(),
            plan_key: job.plan_key.clone(),
            config_id: job.config_id.clone(),
            execution_id: job.execution_id.clone(),
            step_path: ctx.meta.step_path.clone(),
            timestamp: Utc::now(),
            trace_id: None,
            span_id: None,
            request_url: result.request.as_ref().map(|r| r.url.clone()).unwrap_or_default(),
            request_method: result
                .request
                .as_ref()
                .map(|r| r.method.clone())
                .unwrap_or_else(|| step.method.clone()),
            request_headers: result.request.as_ref().map(|r| r.headers.clone()),
            status_code,
            response_body,
            response_headers,
            response_size,
            duration_ms,
            extracted_data: None,
        };

        let mut headers: Vec<(String, String)> = Vec::new();
        if is_error {
            headers.extend(StepBatchEvent::error_headers());
        }
        let topic = if is_error {
            self.options.error_topic(&job.tenant_id)
        } else {
            self.options.step_batch_topic(&job.tenant_id)
        };
        let bytes = match serde_json::to_vec(&event) {
            Ok(b) => b,
            Err(e) => {
                warn!(error = %e, "failed to serialize step-batch event");
                return;
            }
        };
        let key = Some(job.execution_id.as_str());
        if let Err(e) = self.deps.producer.publish_raw_to_topic(&topic, key, headers, bytes).await {
            warn!(topic, error = %e, "failed to publish step-batch event");
        } else {
            debug!(topic, step_path = %ctx.meta.step_path, "emitted step-batch event");
        }
    }

    async fn emit_lifecycle(&self, job: &JobRequest, event_type: LifecycleEventType, status: &str) {
        let event = LifecycleEvent {
            event_type,
            tenant_id: job.tenant_id.clone(),
            integration: job.integration.clone(),
            plan_key: job.plan_key.clone(),
            config_id: job.config_id.clone(),
            execution_id: job.execution_id.clone(),
            status: status.to_string(),
            timestamp: Utc::now(),
        };
        let key = event.kafka_key();
        let topic = self.options.lifecycle_topic(&job.tenant_id);
        let bytes = match serde_json::to_vec(&event) {
            Ok(b) => b,
            Err(_) => return,
        };
        if let Err(e) = self
            .deps
            .producer
            .publish_raw_to_topic(&topic, Some(&key), vec![], bytes)
            .await
        {
            debug!(topic, error = %e, "lifecycle event publish failed (best-effort, not retried)");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use meadow_core::{
        AuthFlow, MockAuthFlowRepository, MockConfigRepository, MockDistributedLock,
        MockExecutionRepository, MockPlanContextRepository, MockPlanRepository, MockProducer,
        MockStatisticsRepository, PersistentContext, RetryPolicy, Step,
    };
    use meadow_http::HttpClient;
    use meadow_ratelimit::RateLimitManager;
    use std::collections::BTreeMap as Map2;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn blank_step(url: &str) -> Step {
        Step {
            id: Some("root".into()),
            method: "GET".into(),
            url: url.to_string(),
            headers: Map2::new(),
            params: Map2::new(),
            body: None,
            timeout_seconds: 5,
            concurrency: 50,
            retry: RetryPolicy {
                max_retries: 0,
                ..Default::default()
            },
            auth_flow_id: None,
            r#while: None,
            break_when: None,
            abort_when: None,
            retry_when: None,
            ignore_when: None,
            set_context: Map2::new(),
            iterate_over: None,
            sub_steps: vec![],
            abort_on: vec![],
            ignore_on: vec![],
            emit_to_kafka: None,
        }
    }

    fn deps(server_uri: &str) -> (PlanExecutorDeps, Plan, PlanConfig) {
        let step_executor = Arc::new(StepExecutor::new(HttpClient::new(), Arc::new(RateLimitManager::new())));
        let fan_out = Arc::new(FanOutExecutor::new(step_executor.clone()));

        struct NoopRunner;
        #[async_trait]
        impl meadow_auth::FlowRunner for NoopRunner {
            async fn run_flow(&self, _flow: &AuthFlow, _config: Value) -> Result<Value, String> {
                Ok(Value::Null)
            }
        }
        let auth_manager = Arc::new(AuthManager::new(Arc::new(NoopRunner)));

        let mut plans = MockPlanRepository::new();
        let plan = Plan {
            tenant_id: "t1".into(),
            plan_key: "p1".into(),
            root: blank_step(server_uri),
            rate_limits: vec![],
            enabled: true,
            max_execution_seconds: None,
            max_nesting_depth: 8,
        };
        let plan_clone = plan.clone();
        plans
            .expect_get_by_key()
            .returning(move |_, _| Ok(Some(plan_clone.clone())));

        let mut configs = MockConfigRepository::new();
        let config = PlanConfig {
            config_id: "c1".into(),
            tenant_id: "t1".into(),
            data: serde_json::json!({}),
        };
        let config_clone = config.clone();
        configs
            .expect_get_by_id()
            .returning(move |_, _| Ok(Some(config_clone.clone())));

        let auth_flows = MockAuthFlowRepository::new();

        let mut executions = MockExecutionRepository::new();
        executions.expect_create().returning(|_| Ok(()));
        executions.expect_mark_started().returning(|_| Ok(()));
        executions.expect_mark_completed().returning(|_, _, _, _| Ok(()));

        let mut statistics = MockStatisticsRepository::new();
        statistics.expect_record_execution().returning(|_, _, _| Ok(()));
        statistics.expect_increment_api_calls().returning(|_, _, _| Ok(()));

        let mut plan_contexts = MockPlanContextRepository::new();
        plan_contexts
            .expect_get_by_plan_and_config()
            .returning(|_, _, _| Ok(PersistentContext::default()));
        plan_contexts.expect_upsert().returning(|_, _, _, _| Ok(()));

        let mut producer = MockProducer::new();
        producer.expect_publish_raw_to_topic().returning(|_, _, _, _| Ok(()));
        producer.expect_publish_to_topic().returning(|_, _| Ok(()));

        let mut lock = MockDistributedLock::new();
        lock.expect_acquire().returning(|_, _| {
            struct Guard;
            #[async_trait]
            impl meadow_core::LockGuard for Guard {
                async fn release(self: Box<Self>) {}
            }
            Ok(Some(Box::new(Guard) as Box<dyn meadow_core::LockGuard>))
        });

        (
            PlanExecutorDeps {
                plans: Arc::new(plans),
                configs: Arc::new(configs),
                auth_flows: Arc::new(auth_flows),
                executions: Arc::new(executions),
                statistics: Arc::new(statistics),
                plan_contexts: Arc::new(plan_contexts),
                producer: Arc::new(producer),
                lock: Arc::new(lock),
                auth_manager,
                step_executor,
                fan_out,
            },
            plan,
            config,
        )
    }

    #[tokio::test]
    async fn basic_get_succeeds_and_emits_step_batch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"a": 1})))
            .mount(&server)
            .await;

        let (deps, _plan, _config) = deps(&server.uri());
        let executor = PlanExecutor::new(deps, PlanExecutorOptions::default());

        let job = JobRequest {
            execution_id: "e1".into(),
            tenant_id: "t1".into(),
            integration: "shopify".into(),
            plan_key: "p1".into(),
            config_id: "c1".into(),
            context_override: None,
            parent_execution_id: None,
        };

        let result = executor.execute(job).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn abort_on_status_surfaces_aborted_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let (mut deps, mut plan, _config) = deps(&server.uri());
        plan.root.abort_on = vec![403];
        let mut plans = MockPlanRepository::new();
        let plan_clone = plan.clone();
        plans.expect_get_by_key().returning(move |_, _| Ok(Some(plan_clone.clone())));
        deps.plans = Arc::new(plans);

        let executor = PlanExecutor::new(deps, PlanExecutorOptions::default());
        let job = JobRequest {
            execution_id: "e2".into(),
            tenant_id: "t1".into(),
            integration: "shopify".into(),
            plan_key: "p1".into(),
            config_id: "c1".into(),
            context_override: None,
            parent_execution_id: None,
        };

        let result = executor.execute(job).await;
        assert!(matches!(
            result,
            Err(PlanExecutionError::Step(MeadowError::Aborted { .. }))
        ));
    }
}
