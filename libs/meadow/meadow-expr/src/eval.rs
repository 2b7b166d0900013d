use crate::ast::{Base, CmpOp, Expr, Suffix};
use crate::error::ExprError;
use crate::functions;
use serde_json::Value;

/// Spec.md §4.1: nil, empty string/array/map, 0, false → false; otherwise true.
pub fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

pub fn eval(expr: &Expr, ctx: &Value) -> Result<Value, ExprError> {
    match expr {
        Expr::Chain { base, suffixes } => {
            let v = eval_base(base, ctx)?;
            Ok(eval_suffixes(v, suffixes))
        }
        Expr::Pipe(l, r) => {
            let lv = eval(l, ctx)?;
            eval(r, &lv)
        }
        Expr::And(l, r) => {
            let lv = eval(l, ctx)?;
            if truthy(&lv) {
                eval(r, ctx)
            } else {
                Ok(lv)
            }
        }
        Expr::Or(l, r) => {
            let lv = eval(l, ctx)?;
            if truthy(&lv) {
                Ok(lv)
            } else {
                eval(r, ctx)
            }
        }
        Expr::Not(e) => Ok(Value::Bool(!truthy(&eval(e, ctx)?))),
        Expr::Cmp(op, l, r) => {
            let lv = eval(l, ctx)?;
            let rv = eval(r, ctx)?;
            Ok(Value::Bool(compare(*op, &lv, &rv)))
        }
    }
}

fn eval_base(base: &Base, ctx: &Value) -> Result<Value, ExprError> {
    match base {
        Base::Identity => Ok(ctx.clone()),
        Base::Literal(v) => Ok(v.clone()),
        Base::RawString(s) => Ok(Value::String(s.clone())),
        Base::Paren(inner) => eval(inner, ctx),
        Base::FunctionCall(name, args) => {
            let values: Result<Vec<Value>, ExprError> = args.iter().map(|a| eval(a, ctx)).collect();
            functions::call(name, &values?)
        }
    }
}

enum Cursor {
    Single(Value),
    Projected(Vec<Value>),
}

fn eval_suffixes(base: Value, suffixes: &[Suffix]) -> Value {
    let mut cur = Cursor::Single(base);
    for suf in suffixes {
        cur = match (cur, suf) {
            (Cursor::Single(v), Suffix::Field(name)) => Cursor::Single(get_field(&v, name)),
            (Cursor::Single(v), Suffix::Index(i)) => Cursor::Single(get_index(&v, *i)),
            (Cursor::Single(v), Suffix::Wildcard) => {
                Cursor::Projected(v.as_array().cloned().unwrap_or_default())
            }
            (Cursor::Projected(items), Suffix::Field(name)) => {
                Cursor::Projected(items.iter().map(|it| get_field(it, name)).collect())
            }
            (Cursor::Projected(items), Suffix::Index(i)) => {
                Cursor::Projected(items.iter().map(|it| get_index(it, *i)).collect())
            }
            (Cursor::Projected(items), Suffix::Wildcard) => {
                let mut flattened = Vec::new();
                for it in &items {
                    if let Some(arr) = it.as_array() {
                        flattened.extend(arr.iter().cloned());
                    }
                }
                Cursor::Projected(flattened)
            }
        };
    }
    match cur {
        Cursor::Single(v) => v,
        Cursor::Projected(items) => Value::Array(items),
    }
}

fn get_field(v: &Value, name: &str) -> Value {
    match v {
        Value::Object(o) => o.get(name).cloned().unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

fn get_index(v: &Value, idx: i64) -> Value {
    match v {
        Value::Array(a) => {
            let len = a.len() as i64;
            let resolved = if idx < 0 { len + idx } else { idx };
            if resolved < 0 || resolved >= len {
                Value::Null
            } else {
                a[resolved as usize].clone()
            }
        }
        _ => Value::Null,
    }
}

fn compare(op: CmpOp, l: &Value, r: &Value) -> bool {
    match op {
        CmpOp::Eq => l == r,
        CmpOp::Ne => l != r,
        CmpOp::Lt | CmpOp::Le | CmpOp::Gt | CmpOp::Ge => {
            let (Some(lf), Some(rf)) = (as_number(l), as_number(r)) else {
                return false;
            };
            match op {
                CmpOp::Lt => lf < rf,
                CmpOp::Le => lf <= rf,
                CmpOp::Gt => lf > rf,
                CmpOp::Ge => lf >= rf,
                _ => unreachable!(),
            }
        }
    }
}

fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse::<f64>().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    fn run(expr: &str, ctx: Value) -> Value {
        let ast = Parser::parse(expr).unwrap();
        eval(&ast, &ctx).unwrap()
    }

    #[test]
    fn field_access() {
        let ctx = serde_json::json!({"a": {"b": 1}});
        assert_eq!(run("a.b", ctx), serde_json::json!(1));
    }

    #[test]
    fn missing_intermediate_key_yields_null_not_error() {
        let ctx = serde_json::json!({"a": {}});
        assert_eq!(run("a.b.c", ctx), Value::Null);
    }

    #[test]
    fn index_access_supports_negative() {
        let ctx = serde_json::json!({"items": [1, 2, 3]});
        assert_eq!(run("items[-1]", ctx), serde_json::json!(3));
    }

    #[test]
    fn wildcard_projection() {
        let ctx = serde_json::json!({"items": [{"id": 1}, {"id": 2}]});
        assert_eq!(run("items[*].id", ctx), serde_json::json!([1, 2]));
    }

    #[test]
    fn pipe_rebinds_current_node() {
        let ctx = serde_json::json!({"a": {"b": {"c": 5}}});
        assert_eq!(run("a.b | c", ctx), serde_json::json!(5));
    }

    #[test]
    fn boolean_and_or() {
        let ctx = serde_json::json!({"a": true, "b": false});
        assert_eq!(run("a && b", ctx.clone()), Value::Bool(false));
        assert_eq!(run("a || b", ctx), Value::Bool(true));
    }

    #[test]
    fn comparisons() {
        let ctx = serde_json::json!({"status": 429});
        assert_eq!(run("status == `429`", ctx.clone()), Value::Bool(true));
        assert_eq!(run("status >= `400`", ctx), Value::Bool(true));
    }

    #[test]
    fn truthy_matches_spec_rules() {
        assert!(!truthy(&Value::Null));
        assert!(!truthy(&serde_json::json!(0)));
        assert!(!truthy(&serde_json::json!("")));
        assert!(!truthy(&serde_json::json!([])));
        assert!(!truthy(&serde_json::json!({})));
        assert!(truthy(&serde_json::json!(1)));
        assert!(truthy(&serde_json::json!("x")));
    }

    #[test]
    fn function_call_length() {
        let ctx = serde_json::json!({"items": [1, 2, 3]});
        assert_eq!(run("length(items)", ctx), serde_json::json!(3));
    }
}
