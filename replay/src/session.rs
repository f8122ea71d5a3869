//! Replay session lifecycle: start, batched delivery with a one-shot resume,
//! cancellation, report lookup and idle eviction.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use sessionwire_config::ReplaySettings;
use sessionwire_protocol::{CancelAck, RecordedEvent, RunAccepted};
use sessionwire_utils_kv_store::{InMemoryStore, SharedStore};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{ReplayError, Result};
use crate::gate::ReplayGate;
use crate::snapshot::{SnapshotDir, validate_run_id};

/// Default time a finished or cancelled session is kept around.
pub const DEFAULT_IDLE_GRACE: Duration = Duration::from_secs(60);

/// State of one replay, keyed by run id.
#[derive(Debug, Clone)]
pub struct ReplaySession {
    pub run_id: String,
    /// Shared with in-flight readers; never mutated after load.
    pub events: Arc<[RecordedEvent]>,
    pub cursor: usize,
    pub resumed_once: bool,
    pub cancelled: bool,
    /// The log was cut at the event limit.
    pub truncated: bool,
    cancel_token: CancellationToken,
    last_access: Instant,
}

impl ReplaySession {
    fn new(run_id: &str, events: Vec<RecordedEvent>, truncated: bool) -> Self {
        Self {
            run_id: run_id.to_string(),
            events: events.into(),
            cursor: 0,
            resumed_once: false,
            cancelled: false,
            truncated,
            cancel_token: CancellationToken::new(),
            last_access: Instant::now(),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.cursor >= self.events.len()
    }

    /// Finished or cancelled; eligible for eviction.
    pub fn is_terminal(&self) -> bool {
        self.cancelled || self.is_completed()
    }

    /// Moves the cursor just past `last_event_id`, or to the start when the
    /// id is unknown. Only the first call has any effect.
    fn resume_after(&mut self, last_event_id: &str) {
        if self.resumed_once {
            tracing::debug!(run_id = %self.run_id, "ignoring repeated resume");
            return;
        }
        self.resumed_once = true;
        self.cursor = self
            .events
            .iter()
            .position(|event| event.sequence_id == last_event_id)
            .map_or(0, |index| index + 1);
        tracing::info!(
            run_id = %self.run_id,
            last_event_id,
            cursor = self.cursor,
            "resumed replay session"
        );
    }

    fn take_batch(&mut self, batch_size: usize) -> Vec<RecordedEvent> {
        let end = self
            .cursor
            .saturating_add(batch_size)
            .min(self.events.len());
        let batch = self.events[self.cursor..end].to_vec();
        self.cursor = end;
        batch
    }
}

/// One pull from a session.
#[derive(Debug, Clone, PartialEq)]
pub struct NextBatch {
    pub events: Vec<RecordedEvent>,
    pub completed: bool,
    pub cancelled: bool,
    /// Set on the completing batch of a log that was cut at the limit; its
    /// last event is the terminal limit error.
    pub truncated: bool,
}

/// Owns every replay session of the process.
pub struct ReplayManager {
    snapshots: SnapshotDir,
    sessions: SharedStore<ReplaySession>,
    gate: ReplayGate,
    idle_grace: Duration,
    /// Serializes read-modify-write cycles against the session store.
    op_lock: Mutex<()>,
}

impl ReplayManager {
    pub fn new(snapshots: SnapshotDir, gate: ReplayGate) -> Self {
        Self {
            snapshots,
            sessions: InMemoryStore::shared(),
            gate,
            idle_grace: DEFAULT_IDLE_GRACE,
            op_lock: Mutex::new(()),
        }
    }

    pub fn from_settings(settings: &ReplaySettings, gate: ReplayGate) -> Self {
        let snapshots =
            SnapshotDir::new(&settings.snapshot_dir).with_max_events(settings.max_events);
        Self::new(snapshots, gate).with_idle_grace(Duration::from_secs(settings.idle_grace_secs))
    }

    pub fn with_store(mut self, sessions: SharedStore<ReplaySession>) -> Self {
        self.sessions = sessions;
        self
    }

    pub fn with_idle_grace(mut self, idle_grace: Duration) -> Self {
        self.idle_grace = idle_grace;
        self
    }

    pub fn gate(&self) -> ReplayGate {
        self.gate
    }

    pub fn snapshots(&self) -> &SnapshotDir {
        &self.snapshots
    }

    /// Creates a session for `run_id` from its recorded log.
    pub async fn start(&self, run_id: &str) -> Result<RunAccepted> {
        if !self.gate.is_enabled() {
            return Err(ReplayError::Disabled);
        }
        validate_run_id(run_id)?;

        let _op = self.op_lock.lock().await;
        if self.sessions.get(run_id).await.is_some() {
            return Err(ReplayError::AlreadyExists(run_id.to_string()));
        }

        let log = self.snapshots.load_events(run_id).await?;
        if log.events.is_empty() {
            return Err(ReplayError::EmptyLog(run_id.to_string()));
        }

        let total_events = log.events.len();
        let session = ReplaySession::new(run_id, log.events, log.truncated);
        self.sessions.set(run_id, session).await;

        tracing::info!(
            run_id,
            total_events,
            skipped = log.skipped,
            truncated = log.truncated,
            "started replay session"
        );
        Ok(RunAccepted {
            run_id: run_id.to_string(),
            total_events: Some(total_events),
            source_refs: log.source_refs,
            skipped_events: log.skipped,
        })
    }

    /// Returns up to `batch_size` events from the session cursor.
    ///
    /// A `last_event_id` repositions the cursor once per session; later ones
    /// are ignored. A cancelled session yields no further events.
    pub async fn next(
        &self,
        run_id: &str,
        batch_size: usize,
        last_event_id: Option<&str>,
    ) -> Result<NextBatch> {
        let _op = self.op_lock.lock().await;
        let mut session = self
            .sessions
            .get(run_id)
            .await
            .ok_or_else(|| ReplayError::SessionNotFound(run_id.to_string()))?;
        session.last_access = Instant::now();

        if session.cancelled {
            let completed = session.is_completed();
            self.sessions.set(run_id, session).await;
            return Ok(NextBatch {
                events: Vec::new(),
                completed,
                cancelled: true,
                truncated: false,
            });
        }

        if let Some(last_event_id) = last_event_id {
            session.resume_after(last_event_id);
        }
        let events = session.take_batch(batch_size);
        let completed = session.is_completed();
        let truncated = completed && session.truncated;
        tracing::debug!(
            run_id,
            delivered = events.len(),
            cursor = session.cursor,
            completed,
            "replay batch"
        );
        self.sessions.set(run_id, session).await;

        Ok(NextBatch {
            events,
            completed,
            cancelled: false,
            truncated,
        })
    }

    /// Latches the session as cancelled. Unknown ids are acknowledged too.
    pub async fn cancel(&self, run_id: &str) -> CancelAck {
        let _op = self.op_lock.lock().await;
        if let Some(mut session) = self.sessions.get(run_id).await {
            if !session.cancelled {
                session.cancelled = true;
                session.cancel_token.cancel();
                tracing::info!(run_id, cursor = session.cursor, "cancelled replay session");
            }
            session.last_access = Instant::now();
            self.sessions.set(run_id, session).await;
        }
        CancelAck::acknowledged()
    }

    /// Recorded final report, read from the snapshot so it outlives the
    /// session.
    pub async fn report(&self, run_id: &str) -> Result<Value> {
        if !self.gate.is_enabled() {
            return Err(ReplayError::Disabled);
        }
        validate_run_id(run_id)?;
        self.snapshots.load_report(run_id).await
    }

    pub async fn contains(&self, run_id: &str) -> bool {
        self.sessions.get(run_id).await.is_some()
    }

    /// Token that fires when the session is cancelled.
    pub async fn cancellation(&self, run_id: &str) -> Option<CancellationToken> {
        self.sessions
            .get(run_id)
            .await
            .map(|session| session.cancel_token)
    }

    pub async fn session(&self, run_id: &str) -> Option<ReplaySession> {
        self.sessions.get(run_id).await
    }

    /// Evicts terminal sessions that have been idle longer than the grace
    /// period. Returns how many were removed.
    pub async fn sweep(&self) -> usize {
        let _op = self.op_lock.lock().await;
        let mut evicted = 0;
        for run_id in self.sessions.keys().await {
            let Some(session) = self.sessions.get(&run_id).await else {
                continue;
            };
            if session.is_terminal()
                && session.last_access.elapsed() >= self.idle_grace
                && self.sessions.delete(&run_id).await
            {
                evicted += 1;
            }
        }
        if evicted > 0 {
            tracing::info!(evicted, "swept idle replay sessions");
        }
        evicted
    }
}
