//! Model call failures

use serde_json::Value;
use thiserror::Error;

/// A failed completion, classified so callers can decide between retrying
/// and falling back
#[derive(Debug, Error)]
#[error("{message}")]
pub struct LlmError {
    pub kind: LlmErrorKind,
    pub message: String,
}

impl LlmError {
    pub fn new(kind: LlmErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::Network, message)
    }

    pub fn server_error(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::ServerError, message)
    }

    /// The model answered, but not with anything usable
    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::InvalidResponse, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::Unknown, message)
    }

    /// Classify a non-success provider response.
    ///
    /// Provider bodies look like `{"error": {"message": "..."}}`; the inner
    /// message is preferred over the raw body when present.
    pub fn from_status(status: u16, body: &str) -> Self {
        let detail = serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|v| v.pointer("/error/message").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| body.trim().to_string());

        let kind = match status {
            401 | 403 => LlmErrorKind::Auth,
            429 => LlmErrorKind::RateLimit,
            400 | 404 | 413 | 422 => LlmErrorKind::InvalidRequest,
            // 529 is the provider's "overloaded"
            500..=599 => LlmErrorKind::ServerError,
            _ => LlmErrorKind::Unknown,
        };
        Self::new(kind, format!("{} (HTTP {status}): {detail}", kind.as_str()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmErrorKind {
    /// Connect failures, timeouts, interrupted streams
    Network,
    RateLimit,
    /// 5xx and overload
    ServerError,
    Auth,
    InvalidRequest,
    /// Unparseable or empty output
    InvalidResponse,
    Unknown,
}

impl LlmErrorKind {
    /// Whether the same request may succeed later
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Network | Self::RateLimit | Self::ServerError)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network error",
            Self::RateLimit => "rate limited",
            Self::ServerError => "provider error",
            Self::Auth => "authentication failed",
            Self::InvalidRequest => "invalid request",
            Self::InvalidResponse => "invalid response",
            Self::Unknown => "unexpected failure",
        }
    }
}
