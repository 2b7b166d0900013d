//! Job message.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Delivered at-least-once by the job stream, with per-message ack and a
/// visible retry count (tracked by `meadow-stream-worker`, not here).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub tenant_id: String,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub payload: JobPayload,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    PlanExecution,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPayload {
    pub plan_key: String,
    pub integration: String,
    pub config_id: String,
    #[serde(default)]
    pub context_override: Option<Value>,
    #[serde(default)]
    pub parent_execution_id: Option<String>,
}
