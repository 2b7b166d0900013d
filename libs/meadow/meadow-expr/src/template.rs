use crate::ast::Expr;
use crate::error::ExprError;
use crate::eval::eval;
use crate::parser::Parser;
use serde_json::Value;

#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    Expr { raw: String, ast: Expr },
}

/// A template compiled once at plan-/mapping-load time and
/// rendered many times against different contexts.
#[derive(Debug, Clone)]
pub struct CompiledTemplate {
    segments: Vec<Segment>,
    /// True when the whole (trimmed) template is exactly one `{{ expr }}`
    /// with nothing else around it — the "raw value" form.
    whole_expr: bool,
}

impl CompiledTemplate {
    /// Parses `{{ expr }}` occurrences out of `tmpl`; every expression
    /// inside `{{ }}` must compile.
    pub fn compile(tmpl: &str) -> Result<Self, ExprError> {
        let mut segments = Vec::new();
        let mut rest = tmpl;
        let mut literal_before_first = true;
        let mut count = 0usize;
        loop {
            let Some(start) = rest.find("{{") else {
                if !rest.is_empty() {
                    segments.push(Segment::Literal(rest.to_string()));
                }
                break;
            };
            if start > 0 {
                segments.push(Segment::Literal(rest[..start].to_string()));
            } else if count == 0 {
                literal_before_first = true;
            }
            let after_open = &rest[start + 2..];
            let Some(end) = after_open.find("}}") else {
                // Unterminated `{{` — treat the rest as a literal.
                segments.push(Segment::Literal(rest[start..].to_string()));
                break;
            };
            let raw_expr = after_open[..end].trim().to_string();
            let ast = Parser::parse(&raw_expr)?;
            segments.push(Segment::Expr {
                raw: format!("{{{{{}}}}}", &after_open[..end]),
                ast,
            });
            count += 1;
            rest = &after_open[end + 2..];
        }

        let whole_expr = count == 1
            && segments.len() == 1
            && matches!(segments.first(), Some(Segment::Expr { .. }))
            && literal_before_first;

        Ok(Self {
            segments,
            whole_expr,
        })
    }

    /// Renders the template. On a per-expression evaluation error, that
    /// expression's `{{...}}` substring is left verbatim in the output and
    /// the first such error is returned alongside the (otherwise complete)
    /// rendered string.
    pub fn render(&self, ctx: &Value) -> (String, Option<ExprError>) {
        if self.whole_expr {
            if let Some(Segment::Expr { raw, ast }) = self.segments.first() {
                return match eval(ast, ctx) {
                    Ok(value) => (stringify_raw(&value), None),
                    Err(e) => (raw.clone(), Some(e)),
                };
            }
        }

        let mut out = String::new();
        let mut first_error = None;
        for seg in &self.segments {
            match seg {
                Segment::Literal(s) => out.push_str(s),
                Segment::Expr { raw, ast } => match eval(ast, ctx) {
                    Ok(value) => out.push_str(&stringify_embedded(&value)),
                    Err(e) => {
                        out.push_str(raw);
                        if first_error.is_none() {
                            first_error = Some(e);
                        }
                    }
                },
            }
        }
        (out, first_error)
    }

    pub fn has_templating(&self) -> bool {
        self.segments
            .iter()
            .any(|s| matches!(s, Segment::Expr { .. }))
    }
}

/// Whole-template single-expression stringification: strings are returned
/// bare, everything else is JSON-encoded.
fn stringify_raw(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Embedded `{{...}}` occurrences stringify the same way, left-to-right.
fn stringify_embedded(value: &Value) -> String {
    stringify_raw(value)
}

/// Convenience one-shot compile + render, for callers that don't need to
/// reuse the compiled template.
pub fn render_template(tmpl: &str, ctx: &Value) -> Result<String, ExprError> {
    let compiled = CompiledTemplate::compile(tmpl)?;
    let (rendered, err) = compiled.render(ctx);
    match err {
        Some(e) => Err(e),
        None => Ok(rendered),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_template_returns_raw_value() {
        let ctx = serde_json::json!({"x": 5});
        let compiled = CompiledTemplate::compile("{{x}}").unwrap();
        let (rendered, err) = compiled.render(&ctx);
        assert_eq!(rendered, "5");
        assert!(err.is_none());
    }

    #[test]
    fn whole_template_string_value_has_no_quotes() {
        let ctx = serde_json::json!({"name": "alice"});
        let compiled = CompiledTemplate::compile("{{name}}").unwrap();
        let (rendered, _) = compiled.render(&ctx);
        assert_eq!(rendered, "alice");
    }

    #[test]
    fn embedded_occurrences_replaced_left_to_right() {
        let ctx = serde_json::json!({"a": "x", "b": "y"});
        let compiled = CompiledTemplate::compile("prefix-{{a}}-mid-{{b}}-suffix").unwrap();
        let (rendered, err) = compiled.render(&ctx);
        assert_eq!(rendered, "prefix-x-mid-y-suffix");
        assert!(err.is_none());
    }

    #[test]
    fn literal_without_braces_passes_through() {
        let compiled = CompiledTemplate::compile("no templating here").unwrap();
        let (rendered, _) = compiled.render(&serde_json::json!({}));
        assert_eq!(rendered, "no templating here");
    }

    #[test]
    fn bad_nested_function_call_leaves_substring_verbatim() {
        let ctx = serde_json::json!({"x": "not-a-number"});
        let compiled = CompiledTemplate::compile("value={{to_number(x)}}").unwrap();
        let (rendered, err) = compiled.render(&ctx);
        assert_eq!(rendered, "value={{to_number(x)}}");
        assert!(err.is_some());
    }

    #[test]
    fn compile_rejects_bad_expression_syntax() {
        assert!(CompiledTemplate::compile("{{a ===}}").is_err());
    }

    #[test]
    fn round_trips_json_encodable_values_through_whole_template_form() {
        for v in [
            serde_json::json!(42),
            serde_json::json!(true),
            serde_json::json!([1, 2, 3]),
            serde_json::json!({"k": "v"}),
        ] {
            let ctx = serde_json::json!({"x": v.clone()});
            let compiled = CompiledTemplate::compile("{{x}}").unwrap();
            let (rendered, _) = compiled.render(&ctx);
            let parsed: Value = serde_json::from_str(&rendered).unwrap();
            assert_eq!(parsed, v);
        }
    }
}
