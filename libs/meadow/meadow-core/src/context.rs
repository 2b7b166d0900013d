//! Execution context tree + persistent context.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A single field, serialized, must not exceed this size.
pub const MAX_FIELD_BYTES: usize = 64 * 1024;
/// The whole persistent/context map, serialized, must not exceed this size.
pub const MAX_CONTEXT_BYTES: usize = 1024 * 1024;

/// Metadata exposed to expressions under `meta`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionMeta {
    pub tenant_id: String,
    pub plan_key: String,
    pub config_id: String,
    pub execution_id: String,
    pub step_path: String,
    #[serde(default)]
    pub loop_count: u32,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub nesting_level: u32,
}

/// Per-(tenant,plan_key,config_id) key-value store preserved across executions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistentContext {
    pub values: BTreeMap<String, Value>,
}

/// The per-execution data tree exposed to expressions.
///
/// Keys: `response`, `prev`, `parent`, `context` (persistent), `config`,
/// `auth`, `item`, `item_index`, `meta`, plus a scratch `fanout` bucket used
/// only by the fan-out executor (not part of the spec's named keys but
/// needed to host per-item sub-step bodies, §4.6 step 3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub response: Option<Value>,
    pub prev: Option<Value>,
    pub parent: Option<Value>,
    pub context: PersistentContext,
    pub config: Value,
    pub auth: Option<Value>,
    pub item: Option<Value>,
    pub item_index: Option<usize>,
    pub meta: ExecutionMeta,
    #[serde(default)]
    pub fanout: BTreeMap<String, Value>,
    /// Set once a fan-out sub-step lands in its `abort_on` set.
    #[serde(default)]
    pub fanout_policy_abort: bool,
    /// Set once a fan-out sub-step lands in its `abort_on` or `ignore_on` set.
    #[serde(default)]
    pub fanout_policy_error: bool,
}

/// Error raised attempting to write a context value that would exceed a
/// size limit. The map is left unchanged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("context too large: field {field:?}")]
pub struct ContextTooLarge {
    pub field: Option<String>,
}

impl ExecutionContext {
    pub fn new(meta: ExecutionMeta, config: Value, persistent: PersistentContext) -> Self {
        Self {
            response: None,
            prev: None,
            parent: None,
            context: persistent,
            config,
            auth: None,
            item: None,
            item_index: None,
            meta,
            fanout: BTreeMap::new(),
            fanout_policy_abort: false,
            fanout_policy_error: false,
        }
    }

    /// Build the tree handed to the expression evaluator.
    pub fn to_eval_tree(&self) -> Value {
        serde_json::json!({
            "response": self.response,
            "prev": self.prev,
            "parent": self.parent,
            "context": self.context.values,
            "config": self.config,
            "auth": self.auth,
            "item": self.item,
            "item_index": self.item_index,
            "meta": {
                "tenant_id": self.meta.tenant_id,
                "plan_key": self.meta.plan_key,
                "config_id": self.meta.config_id,
                "execution_id": self.meta.execution_id,
                "step_path": self.meta.step_path,
                "loop_count": self.meta.loop_count,
                "retry_count": self.meta.retry_count,
                "nesting_level": self.meta.nesting_level,
            },
            "fanout": self.fanout,
        })
    }

    /// Write `key = value` into the persistent context, enforcing the
    /// per-field and whole-map size limits.
    /// On failure the map is left unchanged.
    pub fn set_context_value(&mut self, key: &str, value: Value) -> Result<(), ContextTooLarge> {
        let field_size = serde_json::to_vec(&value).map(|v| v.len()).unwrap_or(usize::MAX);
        if field_size > MAX_FIELD_BYTES {
            return Err(ContextTooLarge {
                field: Some(key.to_string()),
            });
        }

        let mut candidate = self.context.clone();
        candidate.values.insert(key.to_string(), value);
        let total = serde_json::to_vec(&candidate.values)
            .map(|v| v.len())
            .unwrap_or(usize::MAX);
        if total > MAX_CONTEXT_BYTES {
            return Err(ContextTooLarge {
                field: Some(key.to_string()),
            });
        }

        self.context = candidate;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

    #[test]
    fn set_context_value_rejects_oversize_field() {
        let mut ctx = ExecutionContext::new(meta(), Value::Null, PersistentContext::default());
        let huge = Value::String("x".repeat(MAX_FIELD_BYTES + 1));
        let err = ctx.set_context_value("big", huge).unwrap_err();
        assert_eq!(err.field.as_deref(), Some("big"));
        assert!(ctx.context.values.is_empty());
    }

    #[test]
    fn set_context_value_rejects_when_total_exceeds_limit() {
        let mut ctx = ExecutionContext::new(meta(), Value::Null, PersistentContext::default());
        // Fill most of the budget with values just under the field limit.
        let chunk = "x".repeat(MAX_FIELD_BYTES - 100);
        for i in 0..(MAX_CONTEXT_BYTES / (MAX_FIELD_BYTES - 100) + 2) {
            let _ = ctx.set_context_value(&format!("k{i}"), Value::String(chunk.clone()));
        }
        let total: usize = serde_json::to_vec(&ctx.context.values).unwrap().len();
        assert!(total <= MAX_CONTEXT_BYTES);
    }

    #[test]
    fn set_context_value_accepts_small_values() {
        let mut ctx = ExecutionContext::new(meta(), Value::Null, PersistentContext::default());
        ctx.set_context_value("cursor", Value::String("abc".into()))
            .unwrap();
        assert_eq!(
            ctx.context.values.get("cursor"),
            Some(&Value::String("abc".into()))
        );
    }
}
