//! Response parsing and status classification.

use crate::error::HttpError;
use crate::xml::xml_to_json;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

pub const MAX_RESPONSE_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    RateLimited,
    Retryable,
    Permanent,
}

pub fn classify_status(code: u16) -> StatusClass {
    if (200..300).contains(&code) {
        StatusClass::Success
    } else if code == 429 {
        StatusClass::RateLimited
    } else if code == 408 || (500..600).contains(&code) {
        StatusClass::Retryable
    } else {
        StatusClass::Permanent
    }
}

#[derive(Debug, Clone)]
pub struct MaterializedResponse {
    pub status_code: u16,
    /// First value seen per header name.
    pub headers: BTreeMap<String, String>,
    pub body: Value,
    pub size: usize,
    pub duration: Duration,
}

impl MaterializedResponse {
    pub fn status_class(&self) -> StatusClass {
        classify_status(self.status_code)
    }
}

/// Dispatches on content-type: JSON parses, `text/*` is
/// stored as a string, `application/xml`/`text/xml` becomes a nested map,
/// everything else is wrapped as an opaque binary blob.
pub fn parse_body(content_type: Option<&str>, bytes: &[u8]) -> Result<Value, HttpError> {
    let ct = content_type.unwrap_or("").split(';').next().unwrap_or("").trim().to_lowercase();

    if ct == "application/json" || ct.ends_with("+json") {
        return serde_json::from_slice(bytes).map_err(|e| HttpError::Encode(e.to_string()));
    }
    if ct.starts_with("text/") && ct != "text/xml" {
        return Ok(Value::String(String::from_utf8_lossy(bytes).into_owned()));
    }
    if ct == "application/xml" || ct == "text/xml" || ct.ends_with("+xml") {
        return xml_to_json(bytes);
    }
    if ct.is_empty() {
        // No content-type: best-effort JSON, else treat as text.
        if let Ok(v) = serde_json::from_slice::<Value>(bytes) {
            return Ok(v);
        }
        if let Ok(s) = std::str::from_utf8(bytes) {
            return Ok(Value::String(s.to_string()));
        }
    }

    Ok(serde_json::json!({
        "_binary": true,
        "_content_type": content_type.unwrap_or(""),
        "_size": bytes.len(),
        "_base64": base64::Engine::encode(&base64::engine::general_purpose::STANDARD, bytes),
    }))
}
