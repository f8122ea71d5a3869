use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One entry of a recorded event log.
///
/// Loaded once and never mutated; the position in the log is significant.
/// Logs captured straight off an SSE stream use `id`/`event`/`data`, so those
/// names are accepted as aliases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedEvent {
    #[serde(alias = "id")]
    pub sequence_id: String,
    #[serde(alias = "event")]
    pub kind: String,
    #[serde(default, alias = "data")]
    pub payload: Value,
}

impl RecordedEvent {
    pub fn new(sequence_id: impl Into<String>, kind: impl Into<String>, payload: Value) -> Self {
        Self {
            sequence_id: sequence_id.into(),
            kind: kind.into(),
            payload,
        }
    }
}
