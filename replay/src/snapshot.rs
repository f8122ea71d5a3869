//! Recorded snapshot discovery and loading.
//!
//! A run is replayable when its snapshot directory holds both
//! `<runId>.events.ndjson` (one JSON event per line) and
//! `<runId>.report.json`.

use std::path::{Path, PathBuf};

use serde_json::{Value, json};
use sessionwire_protocol::RecordedEvent;
use sessionwire_protocol::wire::KIND_ERROR;

use crate::error::{ReplayError, Result};

pub const EVENTS_SUFFIX: &str = ".events.ndjson";
pub const REPORT_SUFFIX: &str = ".report.json";

/// Upper bound on delivered events per session.
pub const DEFAULT_MAX_EVENTS: usize = 10_000;

/// Rejects run ids that could escape the snapshot directory.
pub fn validate_run_id(run_id: &str) -> Result<()> {
    let valid = !run_id.is_empty()
        && run_id != "."
        && run_id != ".."
        && run_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if valid {
        Ok(())
    } else {
        Err(ReplayError::InvalidRunId(run_id.to_string()))
    }
}

/// An event log ready to be served.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedLog {
    pub events: Vec<RecordedEvent>,
    /// Files the log was assembled from.
    pub source_refs: Vec<String>,
    /// Lines that were not valid events.
    pub skipped: usize,
    /// Whether the log was cut at the event limit.
    pub truncated: bool,
}

/// Parses an NDJSON event log.
///
/// Blank lines are ignored and malformed lines are skipped and counted. A log
/// longer than `max_events` keeps its first `max_events - 1` events followed
/// by a synthesized `error` event, so the limit is never exceeded.
pub fn parse_event_log(run_id: &str, text: &str, max_events: usize) -> LoadedLog {
    let mut events = Vec::new();
    let mut skipped = 0;

    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<RecordedEvent>(line) {
            Ok(event) if !is_frame_safe(&event.sequence_id) || !is_frame_safe(&event.kind) => {
                skipped += 1;
                tracing::warn!(
                    run_id,
                    line = index + 1,
                    "skipping recorded event with a line break or NUL in its id or kind"
                );
            }
            Ok(event) => events.push(event),
            Err(err) => {
                skipped += 1;
                tracing::warn!(run_id, line = index + 1, "skipping malformed recorded event: {err}");
            }
        }
    }

    let max_events = max_events.max(1);
    let truncated = events.len() > max_events;
    if truncated {
        tracing::warn!(
            run_id,
            recorded = events.len(),
            max_events,
            "recorded log exceeds event limit; truncating"
        );
        events.truncate(max_events - 1);
        let sequence_id = format!("{run_id}-limit");
        events.push(RecordedEvent::new(
            sequence_id,
            KIND_ERROR,
            limit_exceeded_payload(max_events),
        ));
    }

    LoadedLog {
        events,
        source_refs: Vec::new(),
        skipped,
        truncated,
    }
}

/// SSE `id:` and `event:` fields cannot carry line breaks or NUL.
pub fn is_frame_safe(field: &str) -> bool {
    !field.contains(['\r', '\n', '\0'])
}

fn limit_exceeded_payload(max_events: usize) -> Value {
    json!({
        "kind": "LIMIT_EXCEEDED",
        "message": format!("recorded log exceeds {max_events} events"),
        "field": "events",
        "max": max_events,
    })
}

/// Directory of recorded runs.
#[derive(Debug, Clone)]
pub struct SnapshotDir {
    root: PathBuf,
    max_events: usize,
}

impl SnapshotDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_events: DEFAULT_MAX_EVENTS,
        }
    }

    pub fn with_max_events(mut self, max_events: usize) -> Self {
        self.max_events = max_events;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn max_events(&self) -> usize {
        self.max_events
    }

    pub fn events_path(&self, run_id: &str) -> PathBuf {
        self.root.join(format!("{run_id}{EVENTS_SUFFIX}"))
    }

    pub fn report_path(&self, run_id: &str) -> PathBuf {
        self.root.join(format!("{run_id}{REPORT_SUFFIX}"))
    }

    /// Whether both halves of the snapshot are present.
    pub async fn exists(&self, run_id: &str) -> Result<bool> {
        validate_run_id(run_id)?;
        Ok(is_file(&self.events_path(run_id)).await && is_file(&self.report_path(run_id)).await)
    }

    /// Loads and parses the event log for `run_id`.
    pub async fn load_events(&self, run_id: &str) -> Result<LoadedLog> {
        if !self.exists(run_id).await? {
            return Err(ReplayError::NotFound(run_id.to_string()));
        }
        let events_path = self.events_path(run_id);
        let text = read_to_string(&events_path).await?;
        let mut log = parse_event_log(run_id, &text, self.max_events);
        log.source_refs = vec![
            events_path.display().to_string(),
            self.report_path(run_id).display().to_string(),
        ];
        Ok(log)
    }

    /// Loads the recorded final report for `run_id`.
    pub async fn load_report(&self, run_id: &str) -> Result<Value> {
        if !self.exists(run_id).await? {
            return Err(ReplayError::NotFound(run_id.to_string()));
        }
        let text = read_to_string(&self.report_path(run_id)).await?;
        serde_json::from_str(&text).map_err(|source| ReplayError::InvalidReport {
            run_id: run_id.to_string(),
            source,
        })
    }

    /// Run ids with a complete snapshot, sorted.
    pub async fn list_runs(&self) -> Result<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|source| io_error(&self.root, source))?;
        let mut runs = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|source| io_error(&self.root, source))?
        {
            let name = entry.file_name();
            let Some(run_id) = name.to_str().and_then(|n| n.strip_suffix(EVENTS_SUFFIX)) else {
                continue;
            };
            if validate_run_id(run_id).is_ok() && is_file(&self.report_path(run_id)).await {
                runs.push(run_id.to_string());
            }
        }
        runs.sort();
        Ok(runs)
    }
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.is_file())
        .unwrap_or(false)
}

async fn read_to_string(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|source| io_error(path, source))
}

fn io_error(path: &Path, source: std::io::Error) -> ReplayError {
    ReplayError::Io {
        path: path.to_path_buf(),
        source,
    }
}
