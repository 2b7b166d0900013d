//! Output record.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutputSourceType {
    /// Normal transformer output.
    Orchid,
    /// Mapping/dispatch error emitted to the error topic.
    Lotus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSource {
    #[serde(rename = "type")]
    pub source_type: OutputSourceType,
    pub integration: String,
    pub tenant_id: String,
    pub key: Option<String>,
    pub execution_id: String,
    pub config_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputRecord {
    pub source: OutputSource,
    pub binding_id: String,
    pub mapping_id: String,
    pub mapping_version: u32,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub data: Value,
    pub trace_id: Option<String>,
    pub span_id: Option<String>,
}

/// `data` shape for an error output record: `{stage, error, step_path, input}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecordData {
    pub stage: String,
    pub error: String,
    pub step_path: String,
    pub input: ErrorRecordInput,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecordInput {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub data: Value,
}

/// An entity/relationship-shaped record contains `_entity_type` or
/// `_relationship_type`.
pub fn is_entity_shaped(value: &Value) -> bool {
    value
        .as_object()
        .map(|obj| obj.contains_key("_entity_type") || obj.contains_key("_relationship_type"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_entity_shaped_records() {
        assert!(is_entity_shaped(
            &serde_json::json!({"_entity_type": "user", "id": 1})
        ));
        assert!(is_entity_shaped(
            &serde_json::json!({"_relationship_type": "owns"})
        ));
        assert!(!is_entity_shaped(&serde_json::json!({"id": 1})));
        assert!(!is_entity_shaped(&serde_json::json!("scalar")));
    }
}
