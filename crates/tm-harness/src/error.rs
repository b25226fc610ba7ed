//! Agent-call error taxonomy.
//!
//! Errors from the underlying agent call are classified before deciding
//! retryability: authentication and content-filter errors are never retried;
//! everything else is retried up to the policy's `max_retries`, each attempt
//! gated by the circuit breaker.

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("output blocked by content filtering: {0}")]
    ContentFilter(String),

    #[error("rate limited{}", retry_after.map(|d| format!(" -- retry after {d:?}")).unwrap_or_default())]
    RateLimited {
        retry_after: Option<Duration>,
        message: String,
    },

    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// Fast-fail from the circuit breaker; does not consume a retry.
    #[error("circuit breaker is open -- refusing call")]
    CircuitOpen,

    #[error("agent call failed: {0}")]
    Other(String),
}

impl AgentError {
    /// Whether the retry loop should attempt the call again.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            AgentError::Auth(_) | AgentError::ContentFilter(_) | AgentError::CircuitOpen
        )
    }

    /// Classify a raw error message from an agent adapter.
    ///
    /// Keyword-based on purpose: the underlying SDKs surface failures as
    /// strings, and the taxonomy only has to be good enough to pick a retry
    /// strategy.
    pub fn classify(message: &str) -> Self {
        let lower = message.to_ascii_lowercase();

        if lower.contains("content filtering") || lower.contains("output blocked") {
            return AgentError::ContentFilter(message.to_string());
        }
        if lower.contains("rate") && lower.contains("limit") {
            return AgentError::RateLimited {
                retry_after: None,
                message: message.to_string(),
            };
        }
        if ["auth", "unauthorized", "403", "401"]
            .iter()
            .any(|kw| lower.contains(kw))
        {
            return AgentError::Auth(message.to_string());
        }
        if lower.contains("timeout") || lower.contains("timed out") {
            return AgentError::Timeout(Duration::from_secs(30));
        }
        if ["connect", "connection", "network"]
            .iter()
            .any(|kw| lower.contains(kw))
        {
            return AgentError::Connection(message.to_string());
        }
        for status in [500u16, 502, 503, 504] {
            if lower.contains(&status.to_string()) {
                return AgentError::Server {
                    status,
                    message: message.to_string(),
                };
            }
        }
        AgentError::Other(message.to_string())
    }
}
