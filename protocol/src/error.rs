//! Normalized failure shape returned to every caller of the transport layer.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// HTTP statuses that count as transient server failures.
pub const RETRYABLE_STATUSES: [u16; 4] = [500, 502, 503, 504];

/// Fixed error taxonomy. `NOT_FOUND` is only produced by the replay endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    BadInput,
    LimitExceeded,
    RateLimited,
    Unauthorized,
    Timeout,
    NetworkError,
    ServerError,
    /// Server side only: the named run or session does not exist.
    NotFound,
}

impl ErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            ErrorKind::BadInput => "BAD_INPUT",
            ErrorKind::LimitExceeded => "LIMIT_EXCEEDED",
            ErrorKind::RateLimited => "RATE_LIMITED",
            ErrorKind::Unauthorized => "UNAUTHORIZED",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::NetworkError => "NETWORK_ERROR",
            ErrorKind::ServerError => "SERVER_ERROR",
            ErrorKind::NotFound => "NOT_FOUND",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single normalized error.
///
/// Built only at a transport boundary (the client's response mapping or the
/// replay endpoint's error responses).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "camelCase")]
#[error("{kind}: {message}")]
pub struct ErrorEnvelope {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<u64>,
    /// HTTP status observed at the boundary, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// Raw diagnostics (response body, upstream code, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ErrorEnvelope {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            field: None,
            max: None,
            retry_after_seconds: None,
            status: None,
            details: None,
        }
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn with_max(mut self, max: u64) -> Self {
        self.max = Some(max);
        self
    }

    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after_seconds = Some(seconds);
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Whether the retry combinator may try again after this error.
    ///
    /// Only network failures and 500/502/503/504 server errors qualify.
    /// Timeouts are surfaced immediately.
    pub fn is_retryable(&self) -> bool {
        match self.kind {
            ErrorKind::NetworkError => true,
            ErrorKind::ServerError => self
                .status
                .is_some_and(|status| RETRYABLE_STATUSES.contains(&status)),
            ErrorKind::BadInput
            | ErrorKind::LimitExceeded
            | ErrorKind::RateLimited
            | ErrorKind::Unauthorized
            | ErrorKind::Timeout
            | ErrorKind::NotFound => false,
        }
    }
}

/// JSON error body: `{"error": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorEnvelope,
}

impl From<ErrorEnvelope> for ErrorBody {
    fn from(error: ErrorEnvelope) -> Self {
        Self { error }
    }
}
