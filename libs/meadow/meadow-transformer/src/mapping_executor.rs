//! Compiled mapping + execution: resolves source paths once
//! at compile time, runs the step graph in topological order, and assembles
//! the target record.

use crate::actions::{self, ActionError};
use meadow_core::{ActionValueType, FieldSpec, Link, MappingDefinition, MappingStep, MappingStepKind};
use meadow_expr::{CompiledExpr, ExprError};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Mutex;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum CompileError {
    #[error("source field {field} has an invalid path: {source}")]
    BadSourcePath { field: String, #[source] source: ExprError },
    #[error("target field {field} has an invalid path: {reason}")]
    BadTargetPath { field: String, reason: String },
    #[error("step {0} references an unknown action {1:?}")]
    UnknownAction(String, String),
    #[error("duplicate step id: {0}")]
    DuplicateStepId(String),
    #[error("step graph has a cycle through: {0:?}")]
    Cycle(Vec<String>),
    #[error("link {0:?} -> {1:?} references an unknown field id")]
    UnknownLinkField(String, String),
}

#[derive(Debug, thiserror::Error)]
pub enum MappingExecError {
    #[error("source field read failed: {0}")]
    SourceRead(#[from] ExprError),
    #[error("step {step} references unresolved input {input:?}")]
    UnresolvedInput { step: String, input: String },
    #[error("step {step} action failed: {source}")]
    Action { step: String, #[source] source: ActionError },
    #[error("validator step {0} failed")]
    ValidationFailed(String),
    #[error("target field {field} rejected value of the wrong type")]
    TypeMismatch { field: String },
}

/// A single segment of a parsed dotted target path: `a.b[2].c` -> `[Key(a),
/// Key(b), Index(2), Key(c)]`.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PathSegment {
    Key(String),
    Index(usize),
}

fn parse_target_path(path: &str) -> Result<Vec<PathSegment>, String> {
    let mut segments = Vec::new();
    for raw in path.split('.') {
        if raw.is_empty() {
            return Err(format!("empty path segment in {path:?}"));
        }
        let mut rest = raw;
        if let Some(bracket) = rest.find('[') {
            let key = &rest[..bracket];
            if !key.is_empty() {
                segments.push(PathSegment::Key(key.to_string()));
            }
            rest = &rest[bracket..];
            while let Some(stripped) = rest.strip_prefix('[') {
                let close = stripped.find(']').ok_or_else(|| format!("unterminated index in {path:?}"))?;
                let idx: usize = stripped[..close]
                    .parse()
                    .map_err(|_| format!("non-numeric index in {path:?}"))?;
                segments.push(PathSegment::Index(idx));
                rest = &stripped[close + 1..];
            }
        } else {
            segments.push(PathSegment::Key(rest.to_string()));
        }
    }
    if segments.is_empty() {
        return Err(format!("empty path {path:?}"));
    }
    Ok(segments)
}

fn set_path(root: &mut Value, segments: &[PathSegment], value: Value) {
    let Some((first, rest)) = segments.split_first() else {
        *root = value;
        return;
    };
    match first {
        PathSegment::Key(key) => {
            if !root.is_object() {
                *root = Value::Object(Default::default());
            }
            let obj = root.as_object_mut().expect("just ensured object");
            let slot = obj.entry(key.clone()).or_insert(Value::Null);
            if rest.is_empty() {
                *slot = value;
            } else {
                set_path(slot, rest, value);
            }
        }
        PathSegment::Index(idx) => {
            if !root.is_array() {
                *root = Value::Array(Vec::new());
            }
            let arr = root.as_array_mut().expect("just ensured array");
            if arr.len() <= *idx {
                arr.resize(*idx + 1, Value::Null);
            }
            if rest.is_empty() {
                arr[*idx] = value;
            } else {
                set_path(&mut arr[*idx], rest, value);
            }
        }
    }
}

/// Kahn's algorithm over the step graph: an edge `a -> b` exists when `b`
/// lists `a`'s id among its `inputs`. Field-id inputs (leaves, resolved from
/// the source tree) never participate in the graph.
fn topo_sort(steps: &[MappingStep]) -> Result<Vec<MappingStep>, CompileError> {
    let mut seen_ids = HashSet::new();
    for step in steps {
        if !seen_ids.insert(step.id.as_str()) {
            return Err(CompileError::DuplicateStepId(step.id.clone()));
        }
    }
    let index_of: HashMap<&str, usize> = steps.iter().enumerate().map(|(i, s)| (s.id.as_str(), i)).collect();

    let mut in_degree = vec![0usize; steps.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); steps.len()];
    for (i, step) in steps.iter().enumerate() {
        for input in &step.inputs {
            if let Some(&dep_idx) = index_of.get(input.as_str()) {
                dependents[dep_idx].push(i);
                in_degree[i] += 1;
            }
        }
    }

    let mut queue: VecDeque<usize> = (0..steps.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(steps.len());
    let mut visited = vec![false; steps.len()];
    while let Some(i) = queue.pop_front() {
        visited[i] = true;
        order.push(i);
        for &dep in &dependents[i] {
            in_degree[dep] -= 1;
            if in_degree[dep] == 0 {
                queue.push_back(dep);
            }
        }
    }

    if order.len() != steps.len() {
        let stuck: Vec<String> = (0..steps.len())
            .filter(|&i| !visited[i])
            .map(|i| steps[i].id.clone())
            .collect();
        return Err(CompileError::Cycle(stuck));
    }
    Ok(order.into_iter().map(|i| steps[i].clone()).collect())
}

fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// A mapping definition compiled into resolved path accessors and a
/// topologically ordered step graph, ready to run against many events.
pub struct CompiledMapping {
    pub tenant_id: String,
    pub mapping_id: String,
    pub version: u32,
    source_accessors: BTreeMap<String, CompiledExpr>,
    target_paths: BTreeMap<String, Vec<PathSegment>>,
    target_fields: BTreeMap<String, FieldSpec>,
    steps: Vec<MappingStep>,
    links: Vec<Link>,
}

pub struct MappingExecResult {
    pub data: Value,
    pub source_field_values: BTreeMap<String, Value>,
}

impl CompiledMapping {
    pub fn compile(def: &MappingDefinition) -> Result<Self, CompileError> {
        let mut source_accessors = BTreeMap::new();
        for field in &def.source_fields {
            let expr = CompiledExpr::compile(&field.path).map_err(|source| CompileError::BadSourcePath {
                field: field.id.clone(),
                source,
            })?;
            source_accessors.insert(field.id.clone(), expr);
        }

        let mut target_paths = BTreeMap::new();
        let mut target_fields = BTreeMap::new();
        for field in &def.target_fields {
            let segments = parse_target_path(&field.path).map_err(|reason| CompileError::BadTargetPath {
                field: field.id.clone(),
                reason,
            })?;
            target_paths.insert(field.id.clone(), segments);
            target_fields.insert(field.id.clone(), field.clone());
        }

        for step in &def.steps {
            if !actions::is_known(&step.action) {
                return Err(CompileError::UnknownAction(step.id.clone(), step.action.clone()));
            }
        }

        for link in &def.links {
            if !source_accessors.contains_key(&link.source_field_id) {
                return Err(CompileError::UnknownLinkField(
                    link.source_field_id.clone(),
                    link.target_field_id.clone(),
                ));
            }
            if !target_fields.contains_key(&link.target_field_id) {
                return Err(CompileError::UnknownLinkField(
                    link.source_field_id.clone(),
                    link.target_field_id.clone(),
                ));
            }
        }

        let steps = topo_sort(&def.steps)?;

        Ok(Self {
            tenant_id: def.tenant_id.clone(),
            mapping_id: def.mapping_id.clone(),
            version: def.version,
            source_accessors,
            target_paths,
            target_fields,
            steps,
            links: def.links.clone(),
        })
    }

    /// Runs the mapping against `event_data`, allocating its own scratch
    /// value map. Prefer [`Self::execute_into`] on a hot path where the
    /// caller holds a [`MappingBufferPool`].
    pub fn execute(&self, event_data: &Value) -> Result<MappingExecResult, MappingExecError> {
        let mut values = BTreeMap::new();
        self.execute_into(event_data, &mut values)
    }

    /// Runs the mapping using `values` as scratch space; the map is cleared
    /// on entry and left populated with every field/step id's resolved
    /// value on return, mirroring what [`MappingExecResult::source_field_values`]
    /// also carries out (cloned) for error-record context.
    pub fn execute_into(
        &self,
        event_data: &Value,
        values: &mut BTreeMap<String, Value>,
    ) -> Result<MappingExecResult, MappingExecError> {
        values.clear();
        for (id, accessor) in &self.source_accessors {
            values.insert(id.clone(), accessor.evaluate(event_data)?);
        }

        let mut skipped: HashSet<String> = HashSet::new();
        for step in &self.steps {
            if step.inputs.iter().any(|i| skipped.contains(i)) {
                skipped.insert(step.id.clone());
                continue;
            }

            let mut args = Vec::with_capacity(step.inputs.len() + step.args.len());
            for input in &step.inputs {
                let value = values.get(input).cloned().ok_or_else(|| MappingExecError::UnresolvedInput {
                    step: step.id.clone(),
                    input: input.clone(),
                })?;
                args.push(value);
            }
            args.extend(step.args.iter().cloned());

            let result = actions::run(&step.action, &args).map_err(|source| MappingExecError::Action {
                step: step.id.clone(),
                source,
            })?;

            match step.kind {
                MappingStepKind::Validator => {
                    if !truthy(&result) {
                        return Err(MappingExecError::ValidationFailed(step.id.clone()));
                    }
                }
                MappingStepKind::Condition => {
                    if !truthy(&result) {
                        skipped.insert(step.id.clone());
                    }
                }
                MappingStepKind::Transform => {}
            }

            values.insert(step.id.clone(), result.clone());
            if let Some(field_id) = &step.output_field_id {
                values.insert(field_id.clone(), result);
            }
        }

        let mut target = Value::Object(Default::default());
        for link in &self.links {
            let value = values.get(&link.source_field_id).cloned().unwrap_or(Value::Null);
            self.write_target_field(&mut target, &link.target_field_id, value)?;
        }
        for step in &self.steps {
            if skipped.contains(&step.id) {
                continue;
            }
            if let Some(field_id) = &step.output_field_id {
                if self.target_fields.contains_key(field_id) {
                    let value = values.get(field_id).cloned().unwrap_or(Value::Null);
                    self.write_target_field(&mut target, field_id, value)?;
                }
            }
        }

        Ok(MappingExecResult {
            data: target,
            source_field_values: values.clone(),
        })
    }

    fn write_target_field(&self, target: &mut Value, field_id: &str, value: Value) -> Result<(), MappingExecError> {
        let spec = self
            .target_fields
            .get(field_id)
            .expect("target field ids are validated at compile time");
        if !spec.nullable && value.is_null() || !spec.value_type.accepts(&value) {
            return Err(MappingExecError::TypeMismatch {
                field: field_id.to_string(),
            });
        }
        let segments = &self.target_paths[field_id];
        set_path(target, segments, value);
        Ok(())
    }
}

/// Pool of reusable scratch maps for [`CompiledMapping::execute_into`],
/// avoiding a fresh `BTreeMap` allocation on every dispatched event.
pub struct MappingBufferPool {
    buffers: Mutex<Vec<BTreeMap<String, Value>>>,
}

impl MappingBufferPool {
    pub fn new() -> Self {
        Self {
            buffers: Mutex::new(Vec::new()),
        }
    }

    pub fn acquire(&self) -> BTreeMap<String, Value> {
        self.buffers.lock().unwrap().pop().unwrap_or_default()
    }

    pub fn release(&self, mut buffer: BTreeMap<String, Value>) {
        buffer.clear();
        let mut buffers = self.buffers.lock().unwrap();
        if buffers.len() < 64 {
            buffers.push(buffer);
        }
    }
}

impl Default for MappingBufferPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meadow_core::ActionValueType;
    use serde_json::json;

    fn field(id: &str, path: &str, value_type: ActionValueType, nullable: bool) -> FieldSpec {
        FieldSpec {
            id: id.into(),
            path: path.into(),
            value_type,
            nullable,
        }
    }

    fn step(id: &str, action: &str, inputs: &[&str], args: Vec<Value>, output: Option<&str>, kind: MappingStepKind) -> MappingStep {
        MappingStep {
            id: id.into(),
            action: action.into(),
            args,
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            output_field_id: output.map(String::from),
            kind,
        }
    }

    #[test]
    fn links_copy_source_to_target_with_type_check() {
        let def = MappingDefinition {
            tenant_id: "t1".into(),
            mapping_id: "m1".into(),
            version: 1,
            source_fields: vec![field("name", "customer.name", ActionValueType::String, false)],
            target_fields: vec![field("out_name", "customer.full_name", ActionValueType::String, false)],
            steps: vec![],
            links: vec![Link {
                source_field_id: "name".into(),
                target_field_id: "out_name".into(),
            }],
        };
        let compiled = CompiledMapping::compile(&def).unwrap();
        let result = compiled.execute(&json!({"customer": {"name": "Ada"}})).unwrap();
        assert_eq!(result.data, json!({"customer": {"full_name": "Ada"}}));
    }

    #[test]
    fn non_nullable_null_value_is_a_type_mismatch() {
        let def = MappingDefinition {
            tenant_id: "t1".into(),
            mapping_id: "m1".into(),
            version: 1,
            source_fields: vec![field("name", "customer.name", ActionValueType::String, false)],
            target_fields: vec![field("out_name", "out_name", ActionValueType::String, false)],
            steps: vec![],
            links: vec![Link {
                source_field_id: "name".into(),
                target_field_id: "out_name".into(),
            }],
        };
        let compiled = CompiledMapping::compile(&def).unwrap();
        let err = compiled.execute(&json!({"customer": {}})).unwrap_err();
        assert!(matches!(err, MappingExecError::TypeMismatch { .. }));
    }

    #[test]
    fn step_graph_runs_in_dependency_order() {
        let def = MappingDefinition {
            tenant_id: "t1".into(),
            mapping_id: "m1".into(),
            version: 1,
            source_fields: vec![field("amount", "amount", ActionValueType::Number, false)],
            target_fields: vec![field("total", "total", ActionValueType::String, false)],
            steps: vec![
                step("doubled", "add", &["amount", "amount"], vec![], None, MappingStepKind::Transform),
                step("formatted", "to_string", &["doubled"], vec![], Some("total"), MappingStepKind::Transform),
            ],
            links: vec![],
        };
        let compiled = CompiledMapping::compile(&def).unwrap();
        let result = compiled.execute(&json!({"amount": 4})).unwrap();
        assert_eq!(result.data, json!({"total": "8.0"}));
    }

    #[test]
    fn condition_false_skips_dependent_steps() {
        let def = MappingDefinition {
            tenant_id: "t1".into(),
            mapping_id: "m1".into(),
            version: 1,
            source_fields: vec![field("flag", "flag", ActionValueType::Bool, false)],
            target_fields: vec![field("out", "out", ActionValueType::Any, true)],
            steps: vec![
                step("gate", "to_bool", &["flag"], vec![], None, MappingStepKind::Condition),
                step("value", "to_string", &["gate"], vec![], Some("out"), MappingStepKind::Transform),
            ],
            links: vec![],
        };
        let compiled = CompiledMapping::compile(&def).unwrap();
        let result = compiled.execute(&json!({"flag": false})).unwrap();
        assert_eq!(result.data, json!({}));
    }

    #[test]
    fn validator_false_aborts_execution() {
        let def = MappingDefinition {
            tenant_id: "t1".into(),
            mapping_id: "m1".into(),
            version: 1,
            source_fields: vec![field("amount", "amount", ActionValueType::Number, false)],
            target_fields: vec![],
            steps: vec![step(
                "non_negative",
                "number_min",
                &["amount"],
                vec![json!(0)],
                None,
                MappingStepKind::Validator,
            )],
            links: vec![],
        };
        let compiled = CompiledMapping::compile(&def).unwrap();
        let err = compiled.execute(&json!({"amount": -5})).unwrap_err();
        assert!(matches!(err, MappingExecError::ValidationFailed(_)));
    }

    #[test]
    fn cyclic_step_graph_fails_to_compile() {
        let def = MappingDefinition {
            tenant_id: "t1".into(),
            mapping_id: "m1".into(),
            version: 1,
            source_fields: vec![],
            target_fields: vec![],
            steps: vec![
                step("a", "to_bool", &["b"], vec![], None, MappingStepKind::Transform),
                step("b", "to_bool", &["a"], vec![], None, MappingStepKind::Transform),
            ],
            links: vec![],
        };
        assert!(matches!(CompiledMapping::compile(&def), Err(CompileError::Cycle(_))));
    }

    #[test]
    fn unknown_action_fails_to_compile() {
        let def = MappingDefinition {
            tenant_id: "t1".into(),
            mapping_id: "m1".into(),
            version: 1,
            source_fields: vec![],
            target_fields: vec![],
            steps: vec![step("a", "frobnicate", &[], vec![], None, MappingStepKind::Transform)],
            links: vec![],
        };
        assert!(matches!(CompiledMapping::compile(&def), Err(CompileError::UnknownAction(..))));
    }

    #[test]
    fn buffer_pool_reuses_released_maps() {
        let pool = MappingBufferPool::new();
        let mut buf = pool.acquire();
        buf.insert("a".to_string(), json!(1));
        pool.release(buf);
        let buf2 = pool.acquire();
        assert!(buf2.is_empty());
    }

    #[test]
    fn array_index_target_path_builds_nested_array() {
        let def = MappingDefinition {
            tenant_id: "t1".into(),
            mapping_id: "m1".into(),
            version: 1,
            source_fields: vec![field("x", "x", ActionValueType::Any, true)],
            target_fields: vec![field("slot", "items[1].value", ActionValueType::Any, true)],
            steps: vec![],
            links: vec![Link {
                source_field_id: "x".into(),
                target_field_id: "slot".into(),
            }],
        };
        let compiled = CompiledMapping::compile(&def).unwrap();
        let result = compiled.execute(&json!({"x": 9})).unwrap();
        assert_eq!(result.data, json!({"items": [null, {"value": 9}]}));
    }
}
