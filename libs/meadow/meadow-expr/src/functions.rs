use crate::error::ExprError;
use serde_json::Value;

pub fn call(name: &str, args: &[Value]) -> Result<Value, ExprError> {
    match name {
        "length" => {
            let v = arg(args, 0)?;
            let len = match v {
                Value::String(s) => s.chars().count(),
                Value::Array(a) => a.len(),
                Value::Object(o) => o.len(),
                Value::Null => return Ok(Value::Number(0.into())),
                _ => return Err(ExprError::at(0, "length() requires string/array/object")),
            };
            Ok(serde_json::json!(len))
        }
        "contains" => {
            let haystack = arg(args, 0)?;
            let needle = arg(args, 1)?;
            let found = match haystack {
                Value::String(s) => needle.as_str().map(|n| s.contains(n)).unwrap_or(false),
                Value::Array(a) => a.contains(needle),
                _ => false,
            };
            Ok(Value::Bool(found))
        }
        "keys" => {
            let v = arg(args, 0)?;
            match v {
                Value::Object(o) => Ok(Value::Array(o.keys().map(|k| Value::String(k.clone())).collect())),
                _ => Ok(Value::Array(vec![])),
            }
        }
        "values" => {
            let v = arg(args, 0)?;
            match v {
                Value::Object(o) => Ok(Value::Array(o.values().cloned().collect())),
                _ => Ok(Value::Array(vec![])),
            }
        }
        "to_string" => {
            let v = arg(args, 0)?;
            let s = match v {
                Value::String(s) => s.clone(),
                Value::Null => String::new(),
                other => other.to_string(),
            };
            Ok(Value::String(s))
        }
        "to_number" => {
            let v = arg(args, 0)?;
            let n = match v {
                Value::Number(n) => n.as_f64().unwrap_or(0.0),
                Value::String(s) => s.trim().parse::<f64>().map_err(|_| {
                    ExprError::at(0, format!("to_number(): cannot parse '{s}'"))
                })?,
                _ => return Err(ExprError::at(0, "to_number() requires string or number")),
            };
            Ok(serde_json::json!(n))
        }
        "not_null" => {
            for a in args {
                if !a.is_null() {
                    return Ok(a.clone());
                }
            }
            Ok(Value::Null)
        }
        "type" => {
            let v = arg(args, 0)?;
            let t = match v {
                Value::Null => "null",
                Value::Bool(_) => "boolean",
                Value::Number(_) => "number",
                Value::String(_) => "string",
                Value::Array(_) => "array",
                Value::Object(_) => "object",
            };
            Ok(Value::String(t.to_string()))
        }
        "join" => {
            let sep = arg(args, 0)?.as_str().unwrap_or("").to_string();
            let arr = arg(args, 1)?;
            match arr {
                Value::Array(items) => {
                    let parts: Vec<String> = items
                        .iter()
                        .map(|v| v.as_str().map(|s| s.to_string()).unwrap_or_else(|| v.to_string()))
                        .collect();
                    Ok(Value::String(parts.join(&sep)))
                }
                _ => Err(ExprError::at(0, "join() requires an array second argument")),
            }
        }
        "starts_with" => {
            let s = arg(args, 0)?.as_str().unwrap_or("").to_string();
            let prefix = arg(args, 1)?.as_str().unwrap_or("").to_string();
            Ok(Value::Bool(s.starts_with(&prefix)))
        }
        "ends_with" => {
            let s = arg(args, 0)?.as_str().unwrap_or("").to_string();
            let suffix = arg(args, 1)?.as_str().unwrap_or("").to_string();
            Ok(Value::Bool(s.ends_with(&suffix)))
        }
        other => Err(ExprError::at(0, format!("unknown function '{other}'"))),
    }
}

fn arg(args: &[Value], i: usize) -> Result<&Value, ExprError> {
    args.get(i)
        .ok_or_else(|| ExprError::at(0, format!("missing argument {i}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_of_array() {
        let out = call("length", &[serde_json::json!([1, 2, 3])]).unwrap();
        assert_eq!(out, serde_json::json!(3));
    }

    #[test]
    fn contains_string() {
        let out = call(
            "contains",
            &[serde_json::json!("hello world"), serde_json::json!("world")],
        )
        .unwrap();
        assert_eq!(out, Value::Bool(true));
    }

    #[test]
    fn not_null_picks_first_non_null() {
        let out = call("not_null", &[Value::Null, serde_json::json!("x")]).unwrap();
        assert_eq!(out, serde_json::json!("x"));
    }

    #[test]
    fn to_number_parses_string() {
        let out = call("to_number", &[serde_json::json!("42")]).unwrap();
        assert_eq!(out, serde_json::json!(42.0));
    }
}
