//! The client half of C2: executes a [`MaterializedRequest`], streaming the
//! response body through a size limiter and dispatching on content-type.

use crate::error::HttpError;
use crate::request::MaterializedRequest;
use crate::response::{parse_body, MaterializedResponse, MAX_RESPONSE_BYTES};
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::{Duration, Instant};

#[derive(Clone)]
pub struct HttpClient {
    inner: reqwest::Client,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient {
    pub fn new() -> Self {
        Self {
            inner: reqwest::Client::builder()
                .connect_timeout(Duration::from_secs(10))
                .build()
                .expect("reqwest client builds with default TLS config"),
        }
    }

    /// `timeout` is the step's `timeout_seconds`; it bounds one HTTP
    /// attempt, not the whole (possibly-retried) step.
    pub async fn execute(
        &self,
        req: MaterializedRequest,
        timeout: Duration,
    ) -> Result<MaterializedResponse, HttpError> {
        let method = reqwest::Method::from_bytes(req.method.as_bytes())
            .map_err(|e| HttpError::InvalidUrl(e.to_string()))?;

        let mut builder = self.inner.request(method, req.url).timeout(timeout);

        let mut header_map = HeaderMap::new();
        for (k, v) in &req.headers {
            let name = HeaderName::from_str(k).map_err(|e| HttpError::Encode(e.to_string()))?;
            let value = HeaderValue::from_str(v).map_err(|e| HttpError::Encode(e.to_string()))?;
            header_map.append(name, value);
        }
        builder = builder.headers(header_map);

        if let Some(body) = req.body {
            builder = builder.body(body);
        }

        let start = Instant::now();
        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                HttpError::Timeout
            } else {
                HttpError::Network(e)
            }
        })?;

        let status_code = response.status().as_u16();

        let mut headers: BTreeMap<String, String> = BTreeMap::new();
        for (name, value) in response.headers() {
            let key = name.as_str().to_string();
            if !headers.contains_key(&key) {
                headers.insert(key, value.to_str().unwrap_or("").to_string());
            }
        }
        let content_type = headers.get("content-type").cloned();

        let bytes = stream_limited(response).await?;
        let size = bytes.len();
        let duration = start.elapsed();

        let body = parse_body(content_type.as_deref(), &bytes)?;

        Ok(MaterializedResponse {
            status_code,
            headers,
            body,
            size,
            duration,
        })
    }
}

async fn stream_limited(response: reqwest::Response) -> Result<Vec<u8>, HttpError> {
    let mut out = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| {
            if e.is_timeout() {
                HttpError::Timeout
            } else {
                HttpError::Network(e)
            }
        })?;
        if out.len() + chunk.len() > MAX_RESPONSE_BYTES {
            return Err(HttpError::ResponseTooLarge {
                limit: MAX_RESPONSE_BYTES,
            });
        }
        out.extend_from_slice(&chunk);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::build_request;
    use meadow_core::{RetryPolicy, Step};
    use std::collections::BTreeMap as Map;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn blank_step(url: &str) -> Step {
        Step {
            id: None,
            method: "GET".into(),
            url: url.to_string(),
            headers: Map::new(),
            params: Map::new(),
            body: None,
            timeout_seconds: 5,
            concurrency: 50,
            retry: RetryPolicy::default(),
            auth_flow_id: None,
            r#while: None,
            break_when: None,
            abort_when: None,
            retry_when: None,
            ignore_when: None,
            set_context: Map::new(),
            iterate_over: None,
            sub_steps: vec![],
            abort_on: vec![],
            ignore_on: vec![],
            emit_to_kafka: None,
        }
    }

    #[tokio::test]
    async fn executes_json_get_and_parses_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"id": 1}))
                    .insert_header("content-type", "application/json"),
            )
            .mount(&server)
            .await;

        let step = blank_step(&format!("{}/users", server.uri()));
        let ctx = serde_json::json!({});
        let req = build_request(&step, &ctx).unwrap();

        let client = HttpClient::new();
        let resp = client.execute(req, Duration::from_secs(5)).await.unwrap();
        assert_eq!(resp.status_code, 200);
        assert_eq!(resp.body, serde_json::json!({"id": 1}));
    }

    #[tokio::test]
    async fn classifies_429_as_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let step = blank_step(&server.uri());
        let req = build_request(&step, &serde_json::json!({})).unwrap();
        let client = HttpClient::new();
        let resp = client.execute(req, Duration::from_secs(5)).await.unwrap();
        assert_eq!(resp.status_class(), crate::response::StatusClass::RateLimited);
    }
}
