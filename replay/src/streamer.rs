//! Paced, pull-based delivery of a session as wire frames.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use sessionwire_async_utils::pause;
use sessionwire_config::ReplaySettings;
use sessionwire_protocol::StreamFrame;
use sessionwire_protocol::wire::{KIND_CANCELLED, KIND_COMPLETE};
use tokio_util::sync::CancellationToken;

use crate::error::ReplayError;
use crate::session::ReplayManager;

/// Batch size and pacing of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSettings {
    pub batch_size: usize,
    /// Pause after a batch that delivered events.
    pub active_pause: Duration,
    /// Pause after an empty batch.
    pub idle_pause: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            batch_size: 25,
            active_pause: Duration::from_millis(100),
            idle_pause: Duration::from_millis(500),
        }
    }
}

impl From<&ReplaySettings> for StreamSettings {
    fn from(settings: &ReplaySettings) -> Self {
        Self {
            batch_size: settings.batch_size.max(1),
            active_pause: Duration::from_millis(settings.active_pause_ms),
            idle_pause: Duration::from_millis(settings.idle_pause_ms),
        }
    }
}

/// Yields the frames of one session followed by exactly one terminal marker
/// (`complete` or `cancelled`), unless the log ended in the limit error.
pub struct ReplayStreamer {
    manager: Arc<ReplayManager>,
    run_id: String,
    settings: StreamSettings,
    resume_from: Option<String>,
    cancel: CancellationToken,
    pending: VecDeque<StreamFrame>,
    last_id: String,
    pause_before_fetch: Option<Duration>,
    finished: bool,
}

impl ReplayStreamer {
    pub async fn open(
        manager: Arc<ReplayManager>,
        run_id: impl Into<String>,
        settings: StreamSettings,
        last_event_id: Option<String>,
    ) -> Self {
        let run_id = run_id.into();
        // An unknown session gets a fresh token; its first fetch ends the stream.
        let cancel = manager
            .cancellation(&run_id)
            .await
            .unwrap_or_default();
        Self {
            manager,
            run_id,
            settings,
            resume_from: last_event_id.filter(|id| !id.is_empty()),
            cancel,
            pending: VecDeque::new(),
            last_id: String::new(),
            pause_before_fetch: None,
            finished: false,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Next frame, or `None` once the terminal marker has been yielded.
    pub async fn next_frame(&mut self) -> Option<StreamFrame> {
        loop {
            if let Some(frame) = self.pending.pop_front() {
                return Some(frame);
            }
            if self.finished {
                return None;
            }

            if let Some(delay) = self.pause_before_fetch.take() {
                // Cancellation cuts the pause short; the fetch below observes it.
                pause(delay, &self.cancel).await;
            }
            self.fetch().await;
        }
    }

    async fn fetch(&mut self) {
        let resume_from = self.resume_from.take();
        let batch = match self
            .manager
            .next(&self.run_id, self.settings.batch_size, resume_from.as_deref())
            .await
        {
            Ok(batch) => batch,
            Err(ReplayError::SessionNotFound(_)) => {
                tracing::debug!(run_id = %self.run_id, "session gone; closing stream as cancelled");
                self.finish(KIND_CANCELLED);
                return;
            }
            Err(err) => {
                tracing::warn!(run_id = %self.run_id, "replay fetch failed: {err}");
                self.finish(KIND_CANCELLED);
                return;
            }
        };

        let delivered = batch.events.len();
        for event in &batch.events {
            self.last_id.clone_from(&event.sequence_id);
            self.pending.push_back(StreamFrame::from_event(event));
        }

        if batch.cancelled {
            self.finish(KIND_CANCELLED);
        } else if batch.completed {
            if batch.truncated {
                self.finished = true;
            } else {
                self.finish(KIND_COMPLETE);
            }
        } else if delivered > 0 {
            self.pause_before_fetch = Some(self.settings.active_pause);
        } else {
            self.pause_before_fetch = Some(self.settings.idle_pause);
        }
    }

    /// Queues the terminal marker. It reuses the id of the last delivered
    /// event, so a client resuming from that id skips only the marker, which
    /// carries no payload, and never loses a recorded event.
    fn finish(&mut self, kind: &str) {
        self.finished = true;
        self.pending
            .push_back(StreamFrame::new(self.last_id.clone(), kind, "{}"));
    }

    pub fn into_stream(self) -> impl Stream<Item = StreamFrame> + Send {
        futures::stream::unfold(self, |mut streamer| async move {
            let frame = streamer.next_frame().await?;
            Some((frame, streamer))
        })
    }
}
