//! Cancellation helpers shared by the replay streamer and the transport client.
//!
//! Cancellation is cooperative: a [`CancellationToken`] is a one-way latch that
//! callers check after each suspension point. Nothing here preempts a step that
//! is already running; a cancelled token only shortens the wait in front of the
//! next step.

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Returned when a wait was cut short by cancellation.
#[derive(Debug, PartialEq, Eq)]
pub enum CancelErr {
    Cancelled,
}

/// Outcome of a cooperative pause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pause {
    /// The full duration elapsed.
    Elapsed,
    /// The token fired first (or was already cancelled).
    Cancelled,
}

impl Pause {
    pub fn is_cancelled(self) -> bool {
        matches!(self, Pause::Cancelled)
    }
}

/// Extension trait racing a future against a cancellation token.
#[async_trait]
pub trait OrCancelExt: Sized {
    type Output;

    /// Returns `Ok(output)` if the future completes first, or
    /// `Err(CancelErr::Cancelled)` if the token fires first.
    async fn or_cancel(self, token: &CancellationToken) -> Result<Self::Output, CancelErr>;
}

#[async_trait]
impl<F> OrCancelExt for F
where
    F: Future + Send,
    F::Output: Send,
{
    type Output = F::Output;

    async fn or_cancel(self, token: &CancellationToken) -> Result<Self::Output, CancelErr> {
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(CancelErr::Cancelled),
            res = self => Ok(res),
        }
    }
}

/// Sleep for `duration` unless `token` fires first.
///
/// A zero duration returns immediately without polling the token, so callers
/// still have to check `token.is_cancelled()` before doing their next step.
pub async fn pause(duration: Duration, token: &CancellationToken) -> Pause {
    if duration.is_zero() {
        return Pause::Elapsed;
    }
    match tokio::time::sleep(duration).or_cancel(token).await {
        Ok(()) => Pause::Elapsed,
        Err(CancelErr::Cancelled) => Pause::Cancelled,
    }
}
