//! (Step, Context) → materialized HTTP request.

use crate::error::HttpError;
use meadow_core::{BodyTemplate, Step};
use meadow_expr::render_template;
use serde_json::Value;

/// Request body must not exceed this many bytes once rendered/encoded.
pub const MAX_REQUEST_BYTES: usize = 5 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct MaterializedRequest {
    pub method: String,
    pub url: reqwest::Url,
    /// Insertion order preserved; header names as written on the step.
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

/// Builds a fully materialized request from a step and the evaluator's
/// context tree. Every template is rendered against `ctx_tree`.
pub fn build_request(step: &Step, ctx_tree: &Value) -> Result<MaterializedRequest, HttpError> {
    let rendered_url = render_template(&step.url, ctx_tree)?;
    let mut url = reqwest::Url::parse(&rendered_url)
        .map_err(|e| HttpError::InvalidUrl(format!("{rendered_url}: {e}")))?;

    if !step.params.is_empty() {
        let mut pairs: Vec<(String, String)> = Vec::with_capacity(step.params.len());
        for (k, v) in &step.params {
            pairs.push((k.clone(), render_template(v, ctx_tree)?));
        }
        // `step.params` is a BTreeMap, so this iteration is already in
        // stable lexicographic key order.
        let mut query = url.query_pairs_mut();
        for (k, v) in pairs {
            query.append_pair(&k, &v);
        }
        drop(query);
    }

    let mut headers = Vec::with_capacity(step.headers.len());
    for (k, v) in &step.headers {
        headers.push((k.clone(), render_template(v, ctx_tree)?));
    }

    let body = match &step.body {
        None => None,
        Some(BodyTemplate::Template(tmpl)) => {
            let rendered = render_template(tmpl, ctx_tree)?;
            Some(rendered.into_bytes())
        }
        Some(BodyTemplate::Tree(tree)) => {
            let rendered = render_tree(tree, ctx_tree)?;
            if !headers
                .iter()
                .any(|(k, _)| k.eq_ignore_ascii_case("content-type"))
            {
                headers.push(("Content-Type".to_string(), "application/json".to_string()));
            }
            Some(
                serde_json::to_vec(&rendered)
                    .map_err(|e| HttpError::Encode(e.to_string()))?,
            )
        }
    };

    if let Some(b) = &body {
        if b.len() > MAX_REQUEST_BYTES {
            return Err(HttpError::RequestTooLarge {
                size: b.len(),
                limit: MAX_REQUEST_BYTES,
            });
        }
    }

    Ok(MaterializedRequest {
        method: step.method.clone(),
        url,
        headers,
        body,
    })
}

/// Recursively renders every string leaf of a JSON tree as a template,
/// leaving the tree shape (arrays/objects/numbers/bools/null) intact.
fn render_tree(tree: &Value, ctx_tree: &Value) -> Result<Value, HttpError> {
    Ok(match tree {
        Value::String(s) => Value::String(render_template(s, ctx_tree)?),
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(render_tree(item, ctx_tree)?);
            }
            Value::Array(out)
        }
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), render_tree(v, ctx_tree)?);
            }
            Value::Object(out)
        }
        other => other.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use meadow_core::RetryPolicy;
    use std::collections::BTreeMap;

    fn blank_step(url: &str) -> Step {
        Step {
            id: None,
            method: "GET".into(),
            url: url.to_string(),
            headers: BTreeMap::new(),
            params: BTreeMap::new(),
            body: None,
            timeout_seconds: 30,
            concurrency: 50,
            retry: RetryPolicy::default(),
            auth_flow_id: None,
            r#while: None,
            break_when: None,
            abort_when: None,
            retry_when: None,
            ignore_when: None,
            set_context: BTreeMap::new(),
            iterate_over: None,
            sub_steps: vec![],
            abort_on: vec![],
            ignore_on: vec![],
            emit_to_kafka: None,
        }
    }

    #[test]
    fn renders_url_and_appends_params_in_sorted_order() {
        let mut step = blank_step("https://api.example.com/{{config.path}}");
        step.params.insert("z".into(), "1".into());
        step.params.insert("a".into(), "2".into());
        let ctx = serde_json::json!({"config": {"path": "users"}});
        let req = build_request(&step, &ctx).unwrap();
        assert_eq!(req.url.as_str(), "https://api.example.com/users?a=2&z=1");
    }

    #[test]
    fn tree_body_sets_json_content_type_when_absent() {
        let mut step = blank_step("https://api.example.com/x");
        step.body = Some(BodyTemplate::Tree(
            serde_json::json!({"name": "{{config.name}}", "n": 1}),
        ));
        let ctx = serde_json::json!({"config": {"name": "acme"}});
        let req = build_request(&step, &ctx).unwrap();
        assert!(req
            .headers
            .iter()
            .any(|(k, v)| k == "Content-Type" && v == "application/json"));
        let body: Value = serde_json::from_slice(&req.body.unwrap()).unwrap();
        assert_eq!(body, serde_json::json!({"name": "acme", "n": 1}));
    }

    #[test]
    fn string_body_does_not_add_content_type() {
        let mut step = blank_step("https://api.example.com/x");
        step.body = Some(BodyTemplate::Template("raw={{config.v}}".into()));
        let ctx = serde_json::json!({"config": {"v": "ok"}});
        let req = build_request(&step, &ctx).unwrap();
        assert!(req.headers.is_empty());
        assert_eq!(req.body.unwrap(), b"raw=ok".to_vec());
    }

    #[test]
    fn oversize_body_is_rejected() {
        let mut step = blank_step("https://api.example.com/x");
        step.body = Some(BodyTemplate::Template("x".repeat(MAX_REQUEST_BYTES + 1)));
        let ctx = serde_json::json!({});
        let err = build_request(&step, &ctx).unwrap_err();
        assert!(matches!(err, HttpError::RequestTooLarge { .. }));
    }
}
