//! Conversion of HTTP and transport failures into [`ErrorEnvelope`]s.
//!
//! Error bodies are parsed leniently: both `{"error": {...}}` and a bare
//! object are accepted, and `kind`, `code` or `type` may carry the
//! `LIMIT_EXCEEDED` marker.

use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde_json::Value;
use sessionwire_protocol::{ErrorEnvelope, ErrorKind};

const LIMIT_EXCEEDED_MARKER: &str = "LIMIT_EXCEEDED";

/// Maps an unsuccessful response.
pub fn from_status(status: u16, headers: &HeaderMap, body: &str) -> ErrorEnvelope {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let detail = parsed.as_ref().map(error_object);

    let message = detail
        .and_then(|d| d.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP {status}"));
    let field = detail
        .and_then(|d| d.get("field"))
        .and_then(Value::as_str)
        .map(str::to_string);
    let max = detail.and_then(|d| d.get("max")).and_then(Value::as_u64);
    let has_limit_marker = detail.is_some_and(|d| {
        ["kind", "code", "type"]
            .iter()
            .filter_map(|key| d.get(*key).and_then(Value::as_str))
            .any(|marker| marker == LIMIT_EXCEEDED_MARKER)
    });

    let kind = match status {
        429 => ErrorKind::RateLimited,
        413 => ErrorKind::LimitExceeded,
        _ if has_limit_marker => ErrorKind::LimitExceeded,
        400 => ErrorKind::BadInput,
        401 | 403 => ErrorKind::Unauthorized,
        _ => ErrorKind::ServerError,
    };

    let mut envelope = ErrorEnvelope::new(kind, message).with_status(status);
    match kind {
        ErrorKind::RateLimited => {
            let retry_after = retry_after_header(headers).or_else(|| {
                detail.and_then(|d| {
                    d.get("retryAfterSeconds")
                        .or_else(|| d.get("retry_after_seconds"))
                        .and_then(Value::as_u64)
                })
            });
            if let Some(seconds) = retry_after {
                envelope = envelope.with_retry_after(seconds);
            }
        }
        ErrorKind::LimitExceeded => {
            if let Some(field) = field {
                envelope = envelope.with_field(field);
            }
            if let Some(max) = max {
                envelope = envelope.with_max(max);
            }
        }
        ErrorKind::BadInput => {
            if let Some(field) = field {
                envelope = envelope.with_field(field);
            }
        }
        _ => {}
    }

    let details = match parsed {
        Some(value) => value,
        None if body.is_empty() => return envelope,
        None => Value::String(body.to_string()),
    };
    envelope.with_details(details)
}

/// Maps a failure that happened before a response was available.
pub fn from_transport(err: &reqwest::Error) -> ErrorEnvelope {
    if err.is_timeout() {
        ErrorEnvelope::new(ErrorKind::Timeout, err.to_string())
    } else {
        ErrorEnvelope::new(ErrorKind::NetworkError, err.to_string())
    }
}

/// The attempt ran past its deadline.
pub fn timed_out(timeout_ms: u128) -> ErrorEnvelope {
    ErrorEnvelope::new(
        ErrorKind::Timeout,
        format!("request timed out after {timeout_ms}ms"),
    )
}

fn error_object(value: &Value) -> &Value {
    match value.get("error") {
        Some(inner) if inner.is_object() => inner,
        _ => value,
    }
}

/// `Retry-After` in delta-seconds. HTTP dates are ignored.
fn retry_after_header(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}
