//! Upstream dispatch: one HTTP call per chat message, no retries, no state.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use tracing::{debug, instrument};

use crate::provider::ProviderConfig;

/// Upper bound on the whole upstream call, connect through body.
pub const DISPATCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Returned when a 2xx response carries no extractable reply text.
pub const EMPTY_REPLY_FALLBACK: &str = "No response.";

/// Provider error bodies are truncated to this many bytes before being
/// carried in the error.
const ERROR_BODY_LIMIT: usize = 2048;

/// A failed upstream call, classified.
#[derive(Clone, Debug, thiserror::Error)]
pub enum DispatchError {
    /// The whole-call deadline elapsed.
    #[error("upstream timed out after {0:?}")]
    Timeout(Duration),

    /// The request never produced an HTTP response (refused, DNS, TLS).
    #[error("upstream unreachable: {0}")]
    Transport(String),

    /// The provider answered with a non-success status.
    #[error("provider returned {status}: {body}")]
    Provider { status: u16, body: String },
}

impl DispatchError {
    /// Short classification string for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "timeout",
            Self::Transport(_) => "transport",
            Self::Provider { .. } => "provider",
        }
    }
}

/// The seam the session manager consumes. One call per chat message; safe
/// to invoke concurrently from any number of sessions.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Forward `message` upstream and await the full reply text.
    async fn dispatch(&self, message: &str) -> Result<String, DispatchError>;
}

/// Real dispatcher: a single chat-completions POST per call.
pub struct HttpDispatcher {
    client: Client,
    config: ProviderConfig,
    timeout: Duration,
}

impl HttpDispatcher {
    pub fn new(config: ProviderConfig) -> Self {
        Self::with_timeout(config, DISPATCH_TIMEOUT)
    }

    /// Override the whole-call timeout (tests use short deadlines).
    pub fn with_timeout(config: ProviderConfig, timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            config,
            timeout,
        }
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn classify(&self, err: reqwest::Error) -> DispatchError {
        if err.is_timeout() {
            DispatchError::Timeout(self.timeout)
        } else {
            DispatchError::Transport(err.to_string())
        }
    }
}

#[async_trait]
impl Dispatcher for HttpDispatcher {
    #[instrument(skip_all, fields(provider = %self.config.kind))]
    async fn dispatch(&self, message: &str) -> Result<String, DispatchError> {
        let body = serde_json::json!({
            "model": self.config.model,
            "messages": [{"role": "user", "content": message}],
        });

        let resp = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(&self.config.api_key)
            .header(CONTENT_TYPE, "application/json")
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(DispatchError::Provider {
                status: status.as_u16(),
                body: truncate_body(body),
            });
        }

        let data: serde_json::Value = resp.json().await.map_err(|e| self.classify(e))?;
        let reply = extract_reply(&data);
        debug!(reply_len = reply.len(), "upstream reply received");
        Ok(reply)
    }
}

/// Pull `choices[0].message.content` out of a chat-completions response.
///
/// A reachable provider that returns an unexpected shape still counts as a
/// success; the caller gets the fallback text instead of an error.
fn extract_reply(data: &serde_json::Value) -> String {
    data.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|v| v.as_str())
        .unwrap_or(EMPTY_REPLY_FALLBACK)
        .to_string()
}

fn truncate_body(body: String) -> String {
    if body.len() <= ERROR_BODY_LIMIT {
        return body;
    }
    // Back off to a char boundary so the slice can't panic.
    let mut end = ERROR_BODY_LIMIT;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    body[..end].to_string()
}
