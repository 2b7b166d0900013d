//! [`FlowRunner`] implementation bridging `meadow-auth` back to the step
//! executor. Breaks the dependency cycle documented
//! on the trait: `meadow-auth` cannot depend on `meadow-extractor` since
//! the step executor needs auth contexts from `meadow-auth`.

use crate::step_executor::{StepExecutor, StepExecutorOptions};
use async_trait::async_trait;
use meadow_auth::FlowRunner;
use meadow_core::{AuthFlow, ExecutionContext, ExecutionMeta};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub struct StepExecutorFlowRunner {
    step_executor: Arc<StepExecutor>,
    max_rate_wait: Duration,
}

impl StepExecutorFlowRunner {
    pub fn new(step_executor: Arc<StepExecutor>, max_rate_wait: Duration) -> Self {
        Self {
            step_executor,
            max_rate_wait,
        }
    }
}

#[async_trait]
impl FlowRunner for StepExecutorFlowRunner {
    /// Runs `flow.root_step` against a context that carries only `config`
    ///, then hands back the evaluator tree so the caller
    /// can pull `token_path`/`expires_in_path` out of it.
    async fn run_flow(&self, flow: &AuthFlow, config: Value) -> Result<Value, String> {
        let meta = ExecutionMeta {
            tenant_id: flow.tenant_id.clone(),
            plan_key: format!("auth_flow:{}", flow.flow_id),
            config_id: String::new(),
            execution_id: Uuid::new_v4().to_string(),
            step_path: "auth_flow".to_string(),
            loop_count: 0,
            retry_count: 0,
            nesting_level: 0,
        };
        let mut ctx = ExecutionContext::new(meta, config, Default::default());

        let opts = StepExecutorOptions {
            tenant_id: flow.tenant_id.clone(),
            integration_id: format!("auth_flow:{}", flow.flow_id),
            config_id: String::new(),
            rate_limits: vec![],
            max_rate_wait: self.max_rate_wait,
        };

        let result = self.step_executor.execute(&flow.root_step, &mut ctx, &opts).await;
        if let Some(err) = result.error {
            return Err(err.to_string());
        }
        Ok(ctx.to_eval_tree())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meadow_core::Step;
    use meadow_http::HttpClient;
    use meadow_ratelimit::RateLimitManager;
    use std::collections::BTreeMap;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn blank_step(url: &str) -> Step {
        Step {
            id: None,
            method: "POST".into(),
            url: url.to_string(),
            headers: BTreeMap::new(),
            params: BTreeMap::new(),
            body: None,
            timeout_seconds: 5,
            concurrency: 50,
            retry: Default::default(),
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

    #[tokio::test]
    async fn runs_flow_and_returns_eval_tree() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"access_token": "tok", "expires_in": 60})),
            )
            .mount(&server)
            .await;

        let step_executor = Arc::new(StepExecutor::new(
            HttpClient::new(),
            Arc::new(RateLimitManager::new()),
        ));
        let runner = StepExecutorFlowRunner::new(step_executor, Duration::from_secs(5));

        let flow = AuthFlow {
            flow_id: "f1".into(),
            tenant_id: "t1".into(),
            root_step: blank_step(&server.uri()),
            token_path: "response.body.access_token".into(),
            expires_in_path: Some("response.body.expires_in".into()),
            ttl_seconds: None,
            header_name: "Authorization".into(),
            header_format: "Bearer {{token}}".into(),
        };

        let tree = runner.run_flow(&flow, serde_json::json!({"base_url": "x"})).await.unwrap();
        assert_eq!(tree["response"]["body"]["access_token"], "tok");
        assert_eq!(tree["auth"], Value::Null);
    }

    #[tokio::test]
    async fn propagates_step_failure_as_error_string() {
        let step_executor = Arc::new(StepExecutor::new(
            HttpClient::new(),
            Arc::new(RateLimitManager::new()),
        ));
        let runner = StepExecutorFlowRunner::new(step_executor, Duration::from_secs(5));

        let mut step = blank_step("http://127.0.0.1:1");
        step.retry.max_retries = 0;
        let flow = AuthFlow {
            flow_id: "f1".into(),
            tenant_id: "t1".into(),
            root_step: step,
            token_path: "response.body.access_token".into(),
            expires_in_path: None,
            ttl_seconds: Some(60),
            header_name: "Authorization".into(),
            header_format: "Bearer {{token}}".into(),
        };

        let result = runner.run_flow(&flow, serde_json::json!({})).await;
        assert!(result.is_err());
    }
}
