//! Request and response bodies shared by the transport client and the replay
//! endpoint.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A run submission.
///
/// Live backends start a fresh analysis from `input`; the replay endpoint
/// ignores `input` and re-serves the recorded log named by `run_id`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(default)]
    pub input: Value,
    /// Caller's token estimate, used for admission control.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_tokens: Option<u64>,
}

impl RunRequest {
    pub fn replay(run_id: impl Into<String>) -> Self {
        Self {
            run_id: Some(run_id.into()),
            ..Self::default()
        }
    }

    pub fn live(input: Value) -> Self {
        Self {
            input,
            ..Self::default()
        }
    }
}

/// Acknowledgement of an accepted run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunAccepted {
    pub run_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_events: Option<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_refs: Vec<String>,
    #[serde(default)]
    pub skipped_events: usize,
}

/// Cancel responses are always success-shaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelAck {
    pub cancelled: bool,
}

impl CancelAck {
    pub const fn acknowledged() -> Self {
        Self { cancelled: true }
    }
}
