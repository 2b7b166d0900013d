//! Plan + step tree data model.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// `(tenant_id, plan_key)` identifies a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub tenant_id: String,
    pub plan_key: String,
    pub root: Step,
    #[serde(default)]
    pub rate_limits: Vec<RateLimitDescriptor>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub max_execution_seconds: Option<u64>,
    #[serde(default = "default_max_nesting_depth")]
    pub max_nesting_depth: u32,
}

fn default_true() -> bool {
    true
}

fn default_max_nesting_depth() -> u32 {
    8
}

impl Plan {
    /// Depth-first nesting check performed at load time; every expression on
    /// every step must also compile (enforced by the caller via
    /// `meadow_expr::Evaluator::validate`).
    pub fn validate_nesting(&self) -> Result<(), String> {
        fn walk(step: &Step, depth: u32, max: u32) -> Result<(), String> {
            if depth > max {
                return Err(format!(
                    "step nesting depth {depth} exceeds max_nesting_depth {max}"
                ));
            }
            for sub in &step.sub_steps {
                walk(sub, depth + 1, max)?;
            }
            Ok(())
        }
        walk(&self.root, 0, self.max_nesting_depth)
    }
}

/// A per-endpoint rate-limit configuration attached to a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitDescriptor {
    /// Host + path-prefix bucket this descriptor applies to, e.g. `"api.example.com/v1/users"`.
    pub endpoint_bucket: String,
    pub capacity: u32,
    pub refill_per_second: f64,
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,
}

fn default_concurrency() -> u32 {
    50
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackoffType {
    #[default]
    Fibonacci,
    Exponential,
    Linear,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub backoff_type: BackoffType,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}
fn default_initial_delay_ms() -> u64 {
    1_000
}
fn default_max_delay_ms() -> u64 {
    60_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_type: BackoffType::default(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryPolicy {
    /// Delay for attempt `k` (1-indexed), capped at `max_delay_ms`. `fib(1)=fib(2)=1`.
    pub fn delay_ms(&self, attempt: u32) -> u64 {
        let raw = match self.backoff_type {
            BackoffType::Fibonacci => self.initial_delay_ms.saturating_mul(fib(attempt)),
            BackoffType::Exponential => {
                let exp = attempt.saturating_sub(1).min(32);
                self.initial_delay_ms.saturating_mul(1u64 << exp)
            }
            BackoffType::Linear => self.initial_delay_ms.saturating_mul(attempt as u64),
        };
        raw.min(self.max_delay_ms)
    }
}

fn fib(n: u32) -> u64 {
    if n <= 2 {
        return 1;
    }
    let (mut a, mut b) = (1u64, 1u64);
    for _ in 3..=n {
        let next = a.saturating_add(b);
        a = b;
        b = next;
    }
    b
}

/// Tri-state flag: `emit_to_kafka` defaults to true when absent from JSON.
pub type TriBool = Option<bool>;

/// A recursive node in a plan's step tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: Option<String>,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    pub body: Option<BodyTemplate>,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,
    #[serde(default)]
    pub retry: RetryPolicy,
    pub auth_flow_id: Option<String>,

    pub r#while: Option<String>,
    pub break_when: Option<String>,
    pub abort_when: Option<String>,
    pub retry_when: Option<String>,
    pub ignore_when: Option<String>,

    #[serde(default)]
    pub set_context: BTreeMap<String, String>,

    pub iterate_over: Option<String>,

    #[serde(default)]
    pub sub_steps: Vec<Step>,

    #[serde(default)]
    pub abort_on: Vec<u16>,
    #[serde(default)]
    pub ignore_on: Vec<u16>,

    /// Tri-state: `None` means "use default (true)".
    pub emit_to_kafka: TriBool,
}

fn default_method() -> String {
    "GET".to_string()
}
fn default_timeout_seconds() -> u64 {
    30
}

impl Step {
    pub fn emits_to_kafka(&self) -> bool {
        self.emit_to_kafka.unwrap_or(true)
    }

    pub fn is_fan_out(&self) -> bool {
        self.iterate_over.is_some() && !self.sub_steps.is_empty()
    }

    pub fn step_id_or(&self, fallback: &str) -> String {
        self.id.clone().unwrap_or_else(|| fallback.to_string())
    }
}

/// Request body: either a single template string or a nested JSON-ish tree
/// of templated string leaves.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BodyTemplate {
    Template(String),
    Tree(serde_json::Value),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fib_backoff_matches_spec_base_cases() {
        assert_eq!(fib(1), 1);
        assert_eq!(fib(2), 1);
        assert_eq!(fib(3), 2);
        assert_eq!(fib(4), 3);
        assert_eq!(fib(5), 5);
    }

    #[test]
    fn retry_delay_caps_at_max() {
        let policy = RetryPolicy {
            max_retries: 5,
            backoff_type: BackoffType::Exponential,
            initial_delay_ms: 1000,
            max_delay_ms: 5000,
        };
        assert_eq!(policy.delay_ms(1), 1000);
        assert_eq!(policy.delay_ms(2), 2000);
        assert_eq!(policy.delay_ms(3), 4000);
        assert_eq!(policy.delay_ms(4), 5000); // would be 8000, capped
    }

    #[test]
    fn linear_backoff() {
        let policy = RetryPolicy {
            backoff_type: BackoffType::Linear,
            initial_delay_ms: 500,
            max_delay_ms: 60_000,
            ..Default::default()
        };
        assert_eq!(policy.delay_ms(1), 500);
        assert_eq!(policy.delay_ms(3), 1500);
    }

    #[test]
    fn emits_to_kafka_defaults_true() {
        let step = Step {
            id: None,
            method: "GET".into(),
            url: String::new(),
            headers: Default::default(),
            params: Default::default(),
            body: None,
            timeout_seconds: 30,
            concurrency: 50,
            retry: RetryPolicy::default(),
            auth_flow_id: None,
            r#while: None,
            break_when: None,
            abort_when: None,
            retry_when: None,
            ignore_when: None,
            set_context: Default::default(),
            iterate_over: None,
            sub_steps: vec![],
            abort_on: vec![],
            ignore_on: vec![],
            emit_to_kafka: None,
        };
        assert!(step.emits_to_kafka());
    }

    #[test]
    fn validate_nesting_rejects_too_deep_trees() {
        let leaf = |id: &str| Step {
            sub_steps: vec![],
            ..blank_step(id)
        };
        let inner = Step {
            sub_steps: vec![leaf("c")],
            ..blank_step("b")
        };
        let root = Step {
            sub_steps: vec![inner],
            ..blank_step("a")
        };
        let plan = Plan {
            tenant_id: "t1".into(),
            plan_key: "p1".into(),
            root,
            rate_limits: vec![],
            enabled: true,
            max_execution_seconds: None,
            max_nesting_depth: 1,
        };
        assert!(plan.validate_nesting().is_err());
    }

    fn blank_step(id: &str) -> Step {
        Step {
            id: Some(id.to_string()),
            method: "GET".into(),
            url: String::new(),
            headers: Default::default(),
            params: Default::default(),
            body: None,
            timeout_seconds: 30,
            concurrency: 50,
            retry: RetryPolicy::default(),
            auth_flow_id: None,
            r#while: None,
            break_when: None,
            abort_when: None,
            retry_when: None,
            ignore_when: None,
            set_context: Default::default(),
            iterate_over: None,
            sub_steps: vec![],
            abort_on: vec![],
            ignore_on: vec![],
            emit_to_kafka: None,
        }
    }
}
