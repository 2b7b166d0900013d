//! Step Executor: runs one step against an
//! [`ExecutionContext`], with retry/backoff, rate-limiting, and the
//! abort/break/ignore decision tree.

use meadow_core::{ExecutionContext, MeadowError, RateLimitDescriptor, Step};
use meadow_http::{HttpClient, MaterializedResponse, StatusClass};
use meadow_ratelimit::{RateLimitKey, RateLimitManager};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Enough of the rendered request for step-batch emission; we
/// don't keep the body around since the response already carries the data
/// downstream consumers need.
#[derive(Debug, Clone)]
pub struct RequestSummary {
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
}

/// Per-execution options a caller supplies to [`StepExecutor::execute`].
#[derive(Debug, Clone)]
pub struct StepExecutorOptions {
    pub tenant_id: String,
    pub integration_id: String,
    pub config_id: String,
    pub rate_limits: Vec<RateLimitDescriptor>,
    pub max_rate_wait: Duration,
}

#[derive(Debug)]
pub struct StepResult {
    pub response: Option<MaterializedResponse>,
    pub request: Option<RequestSummary>,
    pub attempts: u32,
    pub should_abort: bool,
    pub should_break: bool,
    pub ignored: bool,
    pub error: Option<MeadowError>,
}

#[derive(Clone)]
pub struct StepExecutor {
    http: HttpClient,
    rate_limiter: Arc<RateLimitManager>,
}

impl StepExecutor {
    pub fn new(http: HttpClient, rate_limiter: Arc<RateLimitManager>) -> Self {
        Self { http, rate_limiter }
    }

    pub async fn execute(
        &self,
        step: &Step,
        ctx: &mut ExecutionContext,
        opts: &StepExecutorOptions,
    ) -> StepResult {
        let max_retries = step.retry.max_retries;
        let mut last_error: Option<MeadowError> = None;
        let mut last_request: Option<RequestSummary> = None;

        for attempt in 1..=(max_retries + 1) {
            ctx.meta.retry_count = attempt - 1;

            let eval_tree = ctx.to_eval_tree();
            let request = match meadow_http::build_request(step, &eval_tree) {
                Ok(r) => r,
                Err(e) => {
                    // BuildError → Fail, no retry.
                    return StepResult {
                        response: None,
                        request: None,
                        attempts: attempt,
                        should_abort: false,
                        should_break: false,
                        ignored: false,
                        error: Some(e.into()),
                    };
                }
            };

            let summary = RequestSummary {
                method: request.method.clone(),
                url: request.url.to_string(),
                headers: request.headers.iter().cloned().collect(),
            };
            last_request = Some(summary.clone());

            let descriptor = matching_descriptor(&opts.rate_limits, request.url.as_str());
            let rate_key = descriptor.map(|_| RateLimitKey {
                tenant_id: opts.tenant_id.clone(),
                integration_id: opts.integration_id.clone(),
                config_id: opts.config_id.clone(),
                url: request.url.to_string(),
            });

            let release = match (&rate_key, descriptor) {
                (Some(key), Some(desc)) => {
                    match self
                        .rate_limiter
                        .wait_for_limit(key, desc, opts.max_rate_wait)
                        .await
                    {
                        Ok(release) => Some(release),
                        Err(_timed_out) => {
                            last_error =
                                Some(MeadowError::RateLimitWaitTimedOut(opts.max_rate_wait));
                            if attempt <= max_retries {
                                tokio::time::sleep(Duration::from_millis(
                                    step.retry.delay_ms(attempt),
                                ))
                                .await;
                                continue;
                            }
                            break;
                        }
                    }
                }
                _ => None,
            };

            let timeout = Duration::from_secs(step.timeout_seconds);
            let http_result = self.http.execute(request, timeout).await;
            drop(release);

            match http_result {
                Err(e) => {
                    last_error = Some(e.into());
                    if attempt <= max_retries {
                        tokio::time::sleep(Duration::from_millis(step.retry.delay_ms(attempt)))
                            .await;
                        continue;
                    }
                    break;
                }
                Ok(resp) => {
                    if let (Some(key), Some(desc)) = (&rate_key, descriptor) {
                        self.rate_limiter
                            .update_from_response(key, desc, resp.status_code, &resp.headers)
                            .await;
                    }

                    ctx.response = Some(response_to_json(&resp));
                    let eval_tree = ctx.to_eval_tree();

                    let abort = step.abort_on.contains(&resp.status_code)
                        || eval_flag(&step.abort_when, &eval_tree);
                    let ignore = step.ignore_on.contains(&resp.status_code)
                        || eval_flag(&step.ignore_when, &eval_tree);
                    let retry_requested = eval_flag(&step.retry_when, &eval_tree);
                    let should_break = eval_flag(&step.r#while, &eval_tree)
                        && eval_flag(&step.break_when, &eval_tree);

                    apply_set_context(step, ctx, &eval_tree);

                    if abort {
                        return StepResult {
                            response: Some(resp),
                            request: Some(summary),
                            attempts: attempt,
                            should_abort: true,
                            should_break: false,
                            ignored: false,
                            error: None,
                        };
                    }

                    let status_class = resp.status_class();
                    let is_retryable = retry_requested
                        || matches!(status_class, StatusClass::Retryable | StatusClass::RateLimited);

                    if is_retryable {
                        last_error = Some(MeadowError::RetryableStatus(resp.status_code));
                        if attempt <= max_retries {
                            let delay = retry_after_override(&resp)
                                .unwrap_or_else(|| Duration::from_millis(step.retry.delay_ms(attempt)));
                            tokio::time::sleep(delay).await;
                            continue;
                        }
                        return StepResult {
                            response: Some(resp),
                            request: Some(summary),
                            attempts: attempt,
                            should_abort: false,
                            should_break,
                            ignored: ignore,
                            error: last_error,
                        };
                    }

                    return StepResult {
                        response: Some(resp),
                        request: Some(summary),
                        attempts: attempt,
                        should_abort: false,
                        should_break,
                        ignored: ignore,
                        error: None,
                    };
                }
            }
        }

        StepResult {
            response: None,
            request: last_request,
            attempts: max_retries + 1,
            should_abort: false,
            should_break: false,
            ignored: false,
            error: last_error,
        }
    }
}

fn eval_flag(expr: &Option<String>, ctx_tree: &Value) -> bool {
    match expr {
        None => false,
        Some(e) => match meadow_expr::evaluate_bool(e, ctx_tree) {
            Ok(v) => v,
            Err(err) => {
                warn!(expr = %e, error = %err, "condition expression failed to evaluate; treating as false");
                false
            }
        },
    }
}

/// `set_context`: failures are logged, not propagated.
fn apply_set_context(step: &Step, ctx: &mut ExecutionContext, eval_tree: &Value) {
    for (key, expr) in &step.set_context {
        match meadow_expr::evaluate(expr, eval_tree) {
            Ok(value) => {
                if let Err(e) = ctx.set_context_value(key, value) {
                    warn!(key, error = %e, "set_context write skipped: oversize");
                }
            }
            Err(e) => {
                debug!(key, expr, error = %e, "set_context expression failed");
            }
        }
    }
}

fn matching_descriptor<'a>(
    descriptors: &'a [RateLimitDescriptor],
    url: &str,
) -> Option<&'a RateLimitDescriptor> {
    let bucket = meadow_ratelimit::endpoint_bucket(url);
    descriptors.iter().find(|d| d.endpoint_bucket == bucket)
}

/// `429 Retry-After: N` overrides normal backoff.
fn retry_after_override(resp: &MaterializedResponse) -> Option<Duration> {
    if resp.status_code != 429 {
        return None;
    }
    resp.headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("retry-after"))
        .and_then(|(_, v)| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

pub(crate) fn response_to_json(resp: &MaterializedResponse) -> Value {
    serde_json::json!({
        "status": resp.status_code,
        "status_code": resp.status_code,
        "headers": resp.headers,
        "body": resp.body,
        "size": resp.size,
        "duration_ms": resp.duration.as_millis() as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use meadow_core::{ExecutionMeta, PersistentContext, RetryPolicy};
    use std::collections::BTreeMap;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn meta() -> ExecutionMeta {
        ExecutionMeta {
            tenant_id: "t1".into(),
            plan_key: "p1".into(),
            config_id: "c1".into(),
            execution_id: "e1".into(),
            step_path: "root".into(),
            loop_count: 0,
            retry_count: 0,
            nesting_level: 0,
        }
    }

    fn blank_step(url: &str) -> Step {
        Step {
            id: Some("s1".into()),
            method: "GET".into(),
            url: url.to_string(),
            headers: BTreeMap::new(),
            params: BTreeMap::new(),
            body: None,
            timeout_seconds: 5,
            concurrency: 50,
            retry: RetryPolicy {
                max_retries: 1,
                ..Default::default()
            },
            auth_flow_id: None,
            r#while: None,
            break_when: None,
            abort_when: None,
            retry_when: None,
            ignore_when: None,
            set_context: BTreeMap::new(),
            iterate_over: None,
            sub_steps: vec![],
            abort_on: vec![],
            ignore_on: vec![],
            emit_to_kafka: None,
        }
    }

    fn opts() -> StepExecutorOptions {
        StepExecutorOptions {
            tenant_id: "t1".into(),
            integration_id: "i1".into(),
            config_id: "c1".into(),
            rate_limits: vec![],
            max_rate_wait: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn successful_get_returns_response_and_no_flags() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .mount(&server)
            .await;

        let executor = StepExecutor::new(HttpClient::new(), Arc::new(RateLimitManager::new()));
        let mut ctx = ExecutionContext::new(meta(), serde_json::json!({}), PersistentContext::default());
        let step = blank_step(&server.uri());

        let result = executor.execute(&step, &mut ctx, &opts()).await;
        assert!(!result.should_abort);
        assert!(!result.should_break);
        assert!(!result.ignored);
        assert!(result.error.is_none());
        assert_eq!(result.response.unwrap().status_code, 200);
    }

    #[tokio::test]
    async fn abort_on_status_sets_should_abort() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let executor = StepExecutor::new(HttpClient::new(), Arc::new(RateLimitManager::new()));
        let mut ctx = ExecutionContext::new(meta(), serde_json::json!({}), PersistentContext::default());
        let mut step = blank_step(&server.uri());
        step.abort_on = vec![403];

        let result = executor.execute(&step, &mut ctx, &opts()).await;
        assert!(result.should_abort);
    }

    #[tokio::test]
    async fn retryable_status_exhausts_budget_and_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let executor = StepExecutor::new(HttpClient::new(), Arc::new(RateLimitManager::new()));
        let mut ctx = ExecutionContext::new(meta(), serde_json::json!({}), PersistentContext::default());
        let mut step = blank_step(&server.uri());
        step.retry = RetryPolicy {
            max_retries: 1,
            initial_delay_ms: 1,
            max_delay_ms: 5,
            ..Default::default()
        };

        let result = executor.execute(&step, &mut ctx, &opts()).await;
        assert_eq!(result.attempts, 2);
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn set_context_failures_do_not_fail_the_step() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": 5})))
            .mount(&server)
            .await;

        let executor = StepExecutor::new(HttpClient::new(), Arc::new(RateLimitManager::new()));
        let mut ctx = ExecutionContext::new(meta(), serde_json::json!({}), PersistentContext::default());
        let mut step = blank_step(&server.uri());
        step.set_context.insert("cursor".into(), "response.body.missing.deep".into());

        let result = executor.execute(&step, &mut ctx, &opts()).await;
        assert!(result.error.is_none());
    }
}
