//! Advisory admission control keyed by client origin.
//!
//! Two limits are enforced per origin:
//! - a sliding 60 second request window (`RPM`), and
//! - a daily token budget (`DAILY_TOKENS`) that resets lazily on the first
//!   request of a new UTC calendar date.
//!
//! State lives in a [`KeyValueStore`] and is lost on restart. Origins that
//! stop sending are dropped by [`QuotaGuard::sweep`]. This is rate limiting
//! for fairness, not a security boundary.

pub mod clock;

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use sessionwire_utils_kv_store::{InMemoryStore, KeyValueStore, SharedStore};
use tokio::sync::Mutex;

pub use clock::{Clock, ManualClock, SystemClock};

/// Length of the request-counting window.
pub const WINDOW: TimeDelta = TimeDelta::seconds(60);

/// Per-origin limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaLimits {
    pub requests_per_minute: u32,
    pub daily_token_cap: u64,
}

/// Which limit refused a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuotaKind {
    Rpm,
    DailyTokens,
}

impl fmt::Display for QuotaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuotaKind::Rpm => f.write_str("RPM"),
            QuotaKind::DailyTokens => f.write_str("DAILY_TOKENS"),
        }
    }
}

/// Result of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Rejected {
        kind: QuotaKind,
        /// Present for `RPM`; the daily budget resets by date instead.
        retry_after_seconds: Option<u64>,
    },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed)
    }
}

/// Stored per-origin record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaState {
    pub recent_requests: VecDeque<DateTime<Utc>>,
    pub tokens_consumed_today: u64,
    /// Calendar date the token counter belongs to.
    pub reset_date: NaiveDate,
}

impl QuotaState {
    fn new(today: NaiveDate) -> Self {
        Self {
            recent_requests: VecDeque::new(),
            tokens_consumed_today: 0,
            reset_date: today,
        }
    }

    fn roll_over(&mut self, today: NaiveDate) {
        if today > self.reset_date {
            self.tokens_consumed_today = 0;
            self.reset_date = today;
        }
    }

    /// Whether a fresh record would behave identically.
    fn is_stale(&self, today: NaiveDate) -> bool {
        self.recent_requests.is_empty() && self.reset_date < today
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        let horizon = now - WINDOW;
        while self
            .recent_requests
            .front()
            .is_some_and(|oldest| *oldest <= horizon)
        {
            self.recent_requests.pop_front();
        }
    }
}

/// Point-in-time view of one origin's usage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaUsage {
    pub requests_in_window: usize,
    pub tokens_consumed_today: u64,
    pub reset_date: NaiveDate,
}

/// Admission controller shared by every request handler.
pub struct QuotaGuard {
    limits: QuotaLimits,
    store: SharedStore<QuotaState>,
    clock: Arc<dyn Clock>,
    /// Serializes read-modify-write cycles against the store.
    op_lock: Mutex<()>,
}

impl QuotaGuard {
    pub fn new(limits: QuotaLimits) -> Self {
        Self::with_parts(limits, InMemoryStore::shared(), Arc::new(SystemClock))
    }

    pub fn with_parts(
        limits: QuotaLimits,
        store: SharedStore<QuotaState>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            limits,
            store,
            clock,
            op_lock: Mutex::new(()),
        }
    }

    pub fn limits(&self) -> QuotaLimits {
        self.limits
    }

    /// Admit or refuse one request from `origin` expected to spend
    /// `estimated_tokens`. Admitted requests are recorded immediately;
    /// refused ones leave no trace.
    pub async fn check(&self, origin: &str, estimated_tokens: u64) -> Admission {
        let _op = self.op_lock.lock().await;
        let now = self.clock.now();
        let mut state = self.load(origin, now).await;

        let admission = self.evaluate(&state, now, estimated_tokens);
        if admission.is_allowed() {
            state.recent_requests.push_back(now);
            state.tokens_consumed_today = state
                .tokens_consumed_today
                .saturating_add(estimated_tokens);
            self.store.set(origin, state).await;
        } else {
            tracing::warn!(origin, ?admission, "quota rejected request");
        }
        admission
    }

    /// Drop origins whose stored state no longer limits anything: an empty
    /// request window and a token counter from a previous date. Returns how
    /// many were evicted.
    pub async fn sweep(&self) -> usize {
        let _op = self.op_lock.lock().await;
        let now = self.clock.now();
        let today = now.date_naive();

        let mut evicted = 0;
        for origin in self.store.keys().await {
            let Some(mut state) = self.store.get(&origin).await else {
                continue;
            };
            state.prune(now);
            if state.is_stale(today) && self.store.delete(&origin).await {
                evicted += 1;
            }
        }
        if evicted > 0 {
            tracing::debug!(evicted, "evicted idle quota origins");
        }
        evicted
    }

    /// Replace an admitted estimate with the tokens actually spent.
    pub async fn record_usage(&self, origin: &str, actual_tokens: u64, estimated_tokens: u64) {
        let _op = self.op_lock.lock().await;
        let now = self.clock.now();
        let mut state = self.load(origin, now).await;
        state.tokens_consumed_today = state
            .tokens_consumed_today
            .saturating_sub(estimated_tokens)
            .saturating_add(actual_tokens);
        self.store.set(origin, state).await;
    }

    pub async fn usage(&self, origin: &str) -> Option<QuotaUsage> {
        let _op = self.op_lock.lock().await;
        let now = self.clock.now();
        let mut state = self.store.get(origin).await?;
        state.roll_over(now.date_naive());
        state.prune(now);
        Some(QuotaUsage {
            requests_in_window: state.recent_requests.len(),
            tokens_consumed_today: state.tokens_consumed_today,
            reset_date: state.reset_date,
        })
    }

    async fn load(&self, origin: &str, now: DateTime<Utc>) -> QuotaState {
        let today = now.date_naive();
        let mut state = self
            .store
            .get(origin)
            .await
            .unwrap_or_else(|| QuotaState::new(today));
        state.roll_over(today);
        state.prune(now);
        state
    }

    fn evaluate(&self, state: &QuotaState, now: DateTime<Utc>, estimated_tokens: u64) -> Admission {
        let limit = self.limits.requests_per_minute as usize;
        if state.recent_requests.len() >= limit {
            let retry_after_seconds = state
                .recent_requests
                .front()
                .map(|oldest| seconds_until(*oldest + WINDOW, now))
                .unwrap_or(1);
            return Admission::Rejected {
                kind: QuotaKind::Rpm,
                retry_after_seconds: Some(retry_after_seconds),
            };
        }

        let projected = state
            .tokens_consumed_today
            .saturating_add(estimated_tokens);
        if projected > self.limits.daily_token_cap {
            return Admission::Rejected {
                kind: QuotaKind::DailyTokens,
                retry_after_seconds: None,
            };
        }

        Admission::Allowed
    }
}

/// Whole seconds from `now` until `at`, rounded up, never below 1.
fn seconds_until(at: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    let millis = (at - now).num_milliseconds().max(0) as u64;
    millis.div_ceil(1_000).max(1)
}
