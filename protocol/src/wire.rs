//! SSE framing of recorded events.
//!
//! Every frame is `id: <sequenceId>`, `event: <kind>`, `data: <payload>`
//! followed by a blank line. Payloads are written as compact JSON, so a
//! frame normally carries exactly one `data:` line.

use serde_json::Value;

use crate::event::RecordedEvent;

/// Marker closing a stream whose session ran to the end of its log.
pub const KIND_COMPLETE: &str = "complete";
/// Marker closing a stream whose session was cancelled.
pub const KIND_CANCELLED: &str = "cancelled";
/// Terminal error event (e.g. a log exceeding the hard cap).
pub const KIND_ERROR: &str = "error";
/// Terminal marker emitted by the analysis backend itself.
pub const KIND_DONE: &str = "done";

/// One framed event as it travels over the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFrame {
    pub id: String,
    pub event: String,
    pub data: String,
}

impl StreamFrame {
    pub fn new(id: impl Into<String>, event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            event: event.into(),
            data: data.into(),
        }
    }

    pub fn from_event(event: &RecordedEvent) -> Self {
        Self {
            id: event.sequence_id.clone(),
            event: event.kind.clone(),
            data: event.payload.to_string(),
        }
    }

    /// Whether this frame ends a stream.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.event.as_str(),
            KIND_COMPLETE | KIND_CANCELLED | KIND_ERROR | KIND_DONE
        )
    }

    /// The payload as JSON, falling back to a JSON string for non-JSON data.
    pub fn payload(&self) -> Value {
        serde_json::from_str(&self.data).unwrap_or_else(|_| Value::String(self.data.clone()))
    }

    pub fn into_recorded(self) -> RecordedEvent {
        let payload = self.payload();
        RecordedEvent {
            sequence_id: self.id,
            kind: self.event,
            payload,
        }
    }

    /// Renders the frame including its trailing blank line.
    pub fn encode(&self) -> String {
        let mut out = format!("id: {}\nevent: {}\n", self.id, self.event);
        for line in self.data.split('\n') {
            out.push_str("data: ");
            out.push_str(line);
            out.push('\n');
        }
        out.push('\n');
        out
    }

    /// Parses one frame (the text between two blank lines).
    ///
    /// Comment lines (`:`) are ignored. Returns `None` for blocks that carry
    /// neither an event name nor data, such as keep-alive comments.
    pub fn decode(block: &str) -> Option<Self> {
        let mut id = String::new();
        let mut event = String::new();
        let mut data: Vec<&str> = Vec::new();

        for line in block.lines() {
            if line.starts_with(':') {
                continue;
            }
            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "id" => id = value.to_string(),
                "event" => event = value.to_string(),
                "data" => data.push(value),
                _ => {}
            }
        }

        if event.is_empty() && data.is_empty() {
            return None;
        }
        if event.is_empty() {
            event = "message".to_string();
        }
        Some(Self {
            id,
            event,
            data: data.join("\n"),
        })
    }

    /// Splits a raw SSE body into frames.
    pub fn decode_all(body: &str) -> Vec<Self> {
        body.replace("\r\n", "\n")
            .split("\n\n")
            .filter_map(Self::decode)
            .collect()
    }
}
