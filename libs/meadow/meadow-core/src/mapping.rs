//! Raw mapping definition. `meadow-transformer` compiles this
//! into a `CompiledMapping` with resolved path accessors and action
//! instances; this crate only carries the wire/storage shape.

use serde::{Deserialize, Serialize};

/// `(tenant_id, mapping_id, version)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingDefinition {
    pub tenant_id: String,
    pub mapping_id: String,
    pub version: u32,
    pub source_fields: Vec<FieldSpec>,
    pub target_fields: Vec<FieldSpec>,
    #[serde(default)]
    pub steps: Vec<MappingStep>,
    #[serde(default)]
    pub links: Vec<Link>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    pub id: String,
    /// JMESPath-style path, relative to the event payload (source) or
    /// output record (target).
    pub path: String,
    #[serde(default)]
    pub value_type: ActionValueType,
    #[serde(default)]
    pub nullable: bool,
}

/// Tagged-variant type lattice for the action graph.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ActionValueType {
    String,
    Number,
    Bool,
    Array,
    Object,
    #[default]
    Any,
}

impl ActionValueType {
    /// Whether a runtime `serde_json::Value` is compatible with this
    /// declared type. `Any` accepts everything; a typed field rejects a
    /// structurally different JSON value.
    pub fn accepts(self, value: &serde_json::Value) -> bool {
        use serde_json::Value as V;
        match self {
            ActionValueType::Any => true,
            ActionValueType::String => matches!(value, V::String(_)) || value.is_null(),
            ActionValueType::Number => matches!(value, V::Number(_)) || value.is_null(),
            ActionValueType::Bool => matches!(value, V::Bool(_)) || value.is_null(),
            ActionValueType::Array => matches!(value, V::Array(_)) || value.is_null(),
            ActionValueType::Object => matches!(value, V::Object(_)) || value.is_null(),
        }
    }
}

/// A direct source -> target field copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Link {
    pub source_field_id: String,
    pub target_field_id: String,
}

/// One typed action invocation in the mapping's step graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingStep {
    pub id: String,
    pub action: String,
    #[serde(default)]
    pub args: Vec<serde_json::Value>,
    /// Field/step ids this step reads from.
    #[serde(default)]
    pub inputs: Vec<String>,
    /// Field id this step's result is written to, if any (steps used purely
    /// as `condition`s/`validator`s may have no output field).
    pub output_field_id: Option<String>,
    #[serde(default)]
    pub kind: MappingStepKind,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MappingStepKind {
    #[default]
    Transform,
    Condition,
    Validator,
}
