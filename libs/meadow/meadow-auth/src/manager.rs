//! Token cache with coalesced concurrent misses.

use crate::error::AuthError;
use crate::runner::FlowRunner;
use chrono::{DateTime, Utc};
use meadow_core::AuthFlow;
use serde_json::Value;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;

/// Clock skew subtracted from `expires_at` before treating a cached token
/// as still valid.
const EXPIRY_SKEW_SECONDS: i64 = 30;
/// Fallback TTL when a flow specifies neither `expires_in_path` nor
/// `ttl_seconds`.
const DEFAULT_TTL_SECONDS: i64 = 3600;

#[derive(Debug, Clone)]
pub struct CachedAuth {
    pub token: String,
    pub token_type: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub refresh_token: Option<String>,
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct AuthContext {
    pub header_name: String,
    pub header_value: String,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    tenant_id: String,
    flow_id: String,
    config_id: String,
}

type CacheSlot = Arc<AsyncMutex<Option<CachedAuth>>>;

pub struct AuthManager {
    runner: Arc<dyn FlowRunner>,
    cache: std::sync::Mutex<HashMap<CacheKey, CacheSlot>>,
}

impl AuthManager {
    pub fn new(runner: Arc<dyn FlowRunner>) -> Self {
        Self {
            runner,
            cache: std::sync::Mutex::new(HashMap::new()),
        }
    }

    fn slot_for(&self, key: &CacheKey) -> CacheSlot {
        let mut cache = self.cache.lock().unwrap();
        cache
            .entry(key.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(None)))
            .clone()
    }

    /// Returns a cached token if still fresh, otherwise executes the flow
    /// (via [`FlowRunner`]) and caches the result. Concurrent callers for
    /// the same `(tenant, flow, config)` share the same cache slot mutex, so
    /// only one of them actually runs the flow.
    pub async fn get_auth_context(
        &self,
        flow: &AuthFlow,
        tenant_id: &str,
        config_id: &str,
        config: Value,
    ) -> Result<AuthContext, AuthError> {
        let key = CacheKey {
            tenant_id: tenant_id.to_string(),
            flow_id: flow.flow_id.clone(),
            config_id: config_id.to_string(),
        };
        let slot = self.slot_for(&key);
        let mut guard = slot.lock().await;

        let now = Utc::now();
        if let Some(cached) = guard.as_ref() {
            if now < cached.expires_at - chrono::Duration::seconds(EXPIRY_SKEW_SECONDS) {
                return Ok(build_context(flow, cached));
            }
        }

        let ctx_tree = self
            .runner
            .run_flow(flow, config)
            .await
            .map_err(AuthError::FlowFailed)?;

        let token_value = meadow_expr::evaluate(&flow.token_path, &ctx_tree)?;
        let token = token_value
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| AuthError::TokenNotFound {
                path: flow.token_path.clone(),
            })?;

        let expires_at = compute_expiry(flow, &ctx_tree, now);

        let cached = CachedAuth {
            token,
            token_type: None,
            expires_at,
            refresh_token: None,
            headers: BTreeMap::new(),
        };
        let context = build_context(flow, &cached);
        *guard = Some(cached);
        Ok(context)
    }

    /// Evicts the cache entry for `(tenant, flow, config)`, forcing the
    /// next `get_auth_context` call to re-run the flow. Called on upstream
    /// `401`.
    pub async fn invalidate_token(&self, tenant_id: &str, flow_id: &str, config_id: &str) {
        let key = CacheKey {
            tenant_id: tenant_id.to_string(),
            flow_id: flow_id.to_string(),
            config_id: config_id.to_string(),
        };
        let slot = self.slot_for(&key);
        *slot.lock().await = None;
    }
}

fn build_context(flow: &AuthFlow, cached: &CachedAuth) -> AuthContext {
    let header_value = meadow_expr::render_template(
        &flow.header_format,
        &serde_json::json!({"token": cached.token}),
    )
    .unwrap_or_else(|_| cached.token.clone());
    AuthContext {
        header_name: flow.header_name.clone(),
        header_value,
        token: cached.token.clone(),
        expires_at: cached.expires_at,
    }
}

fn compute_expiry(flow: &AuthFlow, ctx_tree: &Value, now: DateTime<Utc>) -> DateTime<Utc> {
    if let Some(path) = &flow.expires_in_path {
        if let Ok(v) = meadow_expr::evaluate(path, ctx_tree) {
            if let Some(secs) = v.as_f64() {
                return now + chrono::Duration::milliseconds((secs * 1000.0) as i64);
            }
        }
    }
    if let Some(ttl) = flow.ttl_seconds {
        return now + chrono::Duration::seconds(ttl as i64);
    }
    now + chrono::Duration::seconds(DEFAULT_TTL_SECONDS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use meadow_core::Step;
    use std::collections::BTreeMap as Map;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingRunner {
        calls: AtomicU32,
    }

    #[async_trait]
    impl FlowRunner for CountingRunner {
        async fn run_flow(&self, _flow: &AuthFlow, _config: Value) -> Result<Value, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            Ok(serde_json::json!({"response": {"body": {"access_token": "tok-1", "expires_in": 3600}}}))
        }
    }

    fn blank_flow() -> AuthFlow {
        AuthFlow {
            flow_id: "f1".into(),
            tenant_id: "t1".into(),
            root_step: Step {
                id: None,
                method: "POST".into(),
                url: String::new(),
                headers: Map::new(),
                params: Map::new(),
                body: None,
                timeout_seconds: 30,
                concurrency: 50,
                retry: Default::default(),
                auth_flow_id: None,
                r#while: None,
                break_when: None,
                abort_when: None,
                retry_when: None,
                ignore_when: None,
                set_context: Map::new(),
                iterate_over: None,
                sub_steps: vec![],
                abort_on: vec![],
                ignore_on: vec![],
                emit_to_kafka: None,
            },
            token_path: "response.body.access_token".into(),
            expires_in_path: Some("response.body.expires_in".into()),
            ttl_seconds: None,
            header_name: "Authorization".into(),
            header_format: "Bearer {{token}}".into(),
        }
    }

    #[tokio::test]
    async fn executes_flow_on_miss_and_caches() {
        let runner = Arc::new(CountingRunner {
            calls: AtomicU32::new(0),
        });
        let manager = AuthManager::new(runner.clone());
        let flow = blank_flow();

        let ctx1 = manager
            .get_auth_context(&flow, "t1", "c1", serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(ctx1.header_value, "Bearer tok-1");

        let ctx2 = manager
            .get_auth_context(&flow, "t1", "c1", serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(ctx2.token, "tok-1");
        assert_eq!(runner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_misses_coalesce_to_one_flow_execution() {
        let runner = Arc::new(CountingRunner {
            calls: AtomicU32::new(0),
        });
        let manager = Arc::new(AuthManager::new(runner.clone()));
        let flow = blank_flow();

        let mut handles = Vec::new();
        for _ in 0..5 {
            let manager = manager.clone();
            let flow = flow.clone();
            handles.push(tokio::spawn(async move {
                manager
                    .get_auth_context(&flow, "t1", "c1", serde_json::json!({}))
                    .await
                    .unwrap()
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(runner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalidate_forces_re_execution() {
        let runner = Arc::new(CountingRunner {
            calls: AtomicU32::new(0),
        });
        let manager = AuthManager::new(runner.clone());
        let flow = blank_flow();

        manager
            .get_auth_context(&flow, "t1", "c1", serde_json::json!({}))
            .await
            .unwrap();
        manager.invalidate_token("t1", "f1", "c1").await;
        manager
            .get_auth_context(&flow, "t1", "c1", serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(runner.calls.load(Ordering::SeqCst), 2);
    }
}
