// =============================================================================
// TRANSPORT MODULE
// =============================================================================
// Authenticated JSON calls to the backend REST service.
//
// NOTES:
// - The transport never retries; callers wrap it with crate::retry
// - Non-2xx responses become SyncError::Http with the backend's `message`
//   or `error` text, falling back to the status reason
// - It does not look at or touch engine state
// =============================================================================

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use tokio::sync::RwLock;

use crate::error::{SyncError, SyncResult};
use crate::metrics;

// -----------------------------------------------------------------------------
// TRANSPORT TRAIT
// -----------------------------------------------------------------------------
/// One JSON request/response exchange with the backend.
///
/// The store and the parts workflow only see this trait, so tests can swap
/// in a scripted fake.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn call(&self, method: Method, path: &str, body: Option<Value>) -> SyncResult<Value>;
}

// -----------------------------------------------------------------------------
// REQWEST IMPLEMENTATION
// -----------------------------------------------------------------------------
/// Transport over HTTPS with a bearer token and a cookie-backed session.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,

    /// Swapped at runtime when the session's token is refreshed
    token: RwLock<Option<String>>,
}

impl HttpTransport {
    /// Build a transport for `base_url` (trailing slash ignored).
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: RwLock::new(token),
        })
    }

    /// Replace (or clear) the bearer token used by subsequent calls.
    pub async fn set_token(&self, token: Option<String>) {
        *self.token.write().await = token;
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn call(&self, method: Method, path: &str, body: Option<Value>) -> SyncResult<Value> {
        let start = Instant::now();
        let url = format!("{}{}", self.base_url, path);

        let mut request = self
            .client
            .request(method.clone(), &url)
            .header(CONTENT_TYPE, "application/json");

        if let Some(token) = self.token.read().await.as_deref() {
            request = request.bearer_auth(token);
        }
        if let Some(body) = &body {
            request = request.json(body);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => {
                metrics::record_backend_request(
                    method.as_str(),
                    path,
                    0,
                    start.elapsed().as_secs_f64(),
                );
                tracing::debug!(%url, error = %err, "Backend unreachable");
                return Err(SyncError::Network(err.to_string()));
            }
        };

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|err| SyncError::Network(err.to_string()))?;

        metrics::record_backend_request(
            method.as_str(),
            path,
            status.as_u16(),
            start.elapsed().as_secs_f64(),
        );

        if !status.is_success() {
            // Error bodies are best-effort: anything unparsable counts as `{}`
            let body: Value = serde_json::from_slice(&bytes).unwrap_or_else(|_| json!({}));
            return Err(SyncError::Http {
                status: status.as_u16(),
                message: error_message(&body, status),
            });
        }

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(json!({}));
        }
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// `message` or `error` from a backend error body, else the status reason.
pub fn error_message(body: &Value, status: StatusCode) -> String {
    ["message", "error"]
        .iter()
        .find_map(|key| body.get(*key).and_then(Value::as_str))
        .map(str::to_string)
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .map(str::to_string)
                .unwrap_or_else(|| format!("HTTP {}", status.as_u16()))
        })
}
