//! Mapping step action registry.
//!
//! An action is a plain function over resolved `Value` arguments: a step's
//! `inputs` are resolved first (in declared order), then its literal `args`
//! are appended, and the concatenated slice is passed to the named action.

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ActionError {
    #[error("unknown action: {0}")]
    Unknown(String),
    #[error("action {action} expected {expected} argument(s), got {got}")]
    Arity {
        action: String,
        expected: usize,
        got: usize,
    },
    #[error("action {action} could not coerce argument {index} ({value})")]
    BadArgument {
        action: String,
        index: usize,
        value: Value,
    },
}

fn arity(action: &str, args: &[Value], expected: usize) -> Result<(), ActionError> {
    if args.len() != expected {
        return Err(ActionError::Arity {
            action: action.to_string(),
            expected,
            got: args.len(),
        });
    }
    Ok(())
}

fn number_of(action: &str, args: &[Value], index: usize) -> Result<f64, ActionError> {
    args[index].as_f64().ok_or_else(|| ActionError::BadArgument {
        action: action.to_string(),
        index,
        value: args[index].clone(),
    })
}

fn string_of(action: &str, args: &[Value], index: usize) -> Result<String, ActionError> {
    match &args[index] {
        Value::String(s) => Ok(s.clone()),
        other => other.as_str().map(String::from).ok_or_else(|| ActionError::BadArgument {
            action: action.to_string(),
            index,
            value: args[index].clone(),
        }),
    }
}

/// Runs a registered action by name. Returns [`ActionError::Unknown`] for an
/// unregistered name; callers validate action names at compile time
/// ([`crate::mapping_executor::CompileError::UnknownAction`]) so this branch
/// should be unreachable outside of that check failing to run.
pub fn run(action: &str, args: &[Value]) -> Result<Value, ActionError> {
    match action {
        "to_number" => {
            arity(action, args, 1)?;
            match &args[0] {
                Value::Number(n) => Ok(Value::Number(n.clone())),
                Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .and_then(serde_json::Number::from_f64)
                    .map(Value::Number)
                    .ok_or_else(|| ActionError::BadArgument {
                        action: action.to_string(),
                        index: 0,
                        value: args[0].clone(),
                    }),
                Value::Bool(b) => Ok(Value::from(if *b { 1 } else { 0 })),
                other => Err(ActionError::BadArgument {
                    action: action.to_string(),
                    index: 0,
                    value: other.clone(),
                }),
            }
        }
        "to_string" => {
            arity(action, args, 1)?;
            Ok(Value::String(match &args[0] {
                Value::String(s) => s.clone(),
                Value::Null => String::new(),
                other => other.to_string(),
            }))
        }
        "to_bool" => {
            arity(action, args, 1)?;
            Ok(Value::Bool(truthy(&args[0])))
        }
        "concat" => Ok(Value::String(
            args.iter().map(value_as_display).collect::<Vec<_>>().join(""),
        )),
        "upper" => {
            arity(action, args, 1)?;
            Ok(Value::String(string_of(action, args, 0)?.to_uppercase()))
        }
        "lower" => {
            arity(action, args, 1)?;
            Ok(Value::String(string_of(action, args, 0)?.to_lowercase()))
        }
        "trim" => {
            arity(action, args, 1)?;
            Ok(Value::String(string_of(action, args, 0)?.trim().to_string()))
        }
        "default" => Ok(args.iter().find(|v| !v.is_null()).cloned().unwrap_or(Value::Null)),
        "equals" => {
            arity(action, args, 2)?;
            Ok(Value::Bool(args[0] == args[1]))
        }
        "not" => {
            arity(action, args, 1)?;
            Ok(Value::Bool(!truthy(&args[0])))
        }
        "is_empty" => {
            arity(action, args, 1)?;
            Ok(Value::Bool(is_empty(&args[0])))
        }
        "add" => {
            arity(action, args, 2)?;
            let a = number_of(action, args, 0)?;
            let b = number_of(action, args, 1)?;
            Ok(serde_json::Number::from_f64(a + b).map(Value::Number).unwrap_or(Value::Null))
        }
        // Open question: these names are misleading on purpose —
        // the existing behavior returns a boolean comparison, not the
        // min/max value. Flagged there for product review; implemented
        // literally here rather than "fixed".
        "number_min" => {
            arity(action, args, 2)?;
            let a = number_of(action, args, 0)?;
            let b = number_of(action, args, 1)?;
            Ok(Value::Bool(a <= b))
        }
        "number_max" => {
            arity(action, args, 2)?;
            let a = number_of(action, args, 0)?;
            let b = number_of(action, args, 1)?;
            Ok(Value::Bool(a >= b))
        }
        // Open question: the existing `text_replace` tries a
        // regex compile of the pattern first and falls back to a plain
        // substring replace if the pattern doesn't compile. Kept literally,
        // plus explicit `text_replace_regex`/`text_replace_literal` variants
        // so a mapping author can pick a mode without relying on fallback.
        "text_replace" => {
            arity(action, args, 3)?;
            let input = string_of(action, args, 0)?;
            let pattern = string_of(action, args, 1)?;
            let replacement = string_of(action, args, 2)?;
            Ok(Value::String(match regex::Regex::new(&pattern) {
                Ok(re) => re.replace_all(&input, replacement.as_str()).into_owned(),
                Err(_) => input.replace(&pattern, &replacement),
            }))
        }
        "text_replace_regex" => {
            arity(action, args, 3)?;
            let input = string_of(action, args, 0)?;
            let pattern = string_of(action, args, 1)?;
            let replacement = string_of(action, args, 2)?;
            let re = regex::Regex::new(&pattern).map_err(|_| ActionError::BadArgument {
                action: action.to_string(),
                index: 1,
                value: args[1].clone(),
            })?;
            Ok(Value::String(re.replace_all(&input, replacement.as_str()).into_owned()))
        }
        "text_replace_literal" => {
            arity(action, args, 3)?;
            let input = string_of(action, args, 0)?;
            let pattern = string_of(action, args, 1)?;
            let replacement = string_of(action, args, 2)?;
            Ok(Value::String(input.replace(&pattern, &replacement)))
        }
        other => Err(ActionError::Unknown(other.to_string())),
    }
}

/// Whether `action` is a registered name, checked at mapping compile time.
pub fn is_known(action: &str) -> bool {
    matches!(
        action,
        "to_number"
            | "to_string"
            | "to_bool"
            | "concat"
            | "upper"
            | "lower"
            | "trim"
            | "default"
            | "equals"
            | "not"
            | "is_empty"
            | "add"
            | "number_min"
            | "number_max"
            | "text_replace"
            | "text_replace_regex"
            | "text_replace_literal"
    )
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

fn is_empty(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

fn value_as_display(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn number_min_max_return_booleans_not_values() {
        assert_eq!(run("number_min", &[json!(3), json!(5)]).unwrap(), json!(true));
        assert_eq!(run("number_max", &[json!(3), json!(5)]).unwrap(), json!(false));
    }

    #[test]
    fn text_replace_falls_back_to_literal_on_bad_regex() {
        let out = run("text_replace", &[json!("a(b"), json!("("), json!("X")]).unwrap();
        assert_eq!(out, json!("aXb"));
    }

    #[test]
    fn text_replace_regex_mode_requires_valid_pattern() {
        let err = run("text_replace_regex", &[json!("abc"), json!("("), json!("X")]).unwrap_err();
        assert!(matches!(err, ActionError::BadArgument { .. }));
    }

    #[test]
    fn concat_joins_without_separator() {
        assert_eq!(run("concat", &[json!("a"), json!("b"), json!(1)]).unwrap(), json!("ab1"));
    }

    #[test]
    fn default_returns_first_non_null() {
        assert_eq!(run("default", &[json!(null), json!(null), json!(7)]).unwrap(), json!(7));
    }

    #[test]
    fn unknown_action_is_rejected() {
        assert!(matches!(run("frobnicate", &[]), Err(ActionError::Unknown(_))));
        assert!(!is_known("frobnicate"));
    }
}
