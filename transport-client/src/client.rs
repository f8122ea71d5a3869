//! Resilient client for live and replay run endpoints.

use std::time::Duration;

use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde_json::Value;
use sessionwire_async_utils::{OrCancelExt, pause};
use sessionwire_config::SessionwireConfig;
use sessionwire_protocol::{
    ErrorEnvelope, ErrorKind, IDEMPOTENCY_KEY_HEADER, LAST_EVENT_ID_HEADER, RetryPolicy,
    RunAccepted, RunRequest,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error_map;
use crate::idempotency;
use crate::retry::{backoff_delay, with_retry};
use crate::stream::{EventStream, FrameResult, pump};

const STREAM_CHANNEL_CAPACITY: usize = 100;

/// Which family of endpoints the client talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// `/v1/runs...` on a live analysis backend.
    Live,
    /// `/v1/replay/runs...` on a replay server.
    Replay,
}

impl Target {
    pub fn runs_path(self) -> &'static str {
        match self {
            Target::Live => "/v1/runs",
            Target::Replay => "/v1/replay/runs",
        }
    }
}

/// Per-call knobs for [`TransportClient::run_sync`].
#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    /// Overrides the key derived from the request body.
    pub idempotency_key: Option<String>,
    /// Overrides the client's per-attempt timeout.
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct TransportClient {
    http: reqwest::Client,
    base_url: String,
    target: Target,
    retry: RetryPolicy,
    request_timeout: Duration,
    cancel_timeout: Duration,
}

impl TransportClient {
    pub fn new(base_url: impl Into<String>, target: Target) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, target)
    }

    pub fn with_client(http: reqwest::Client, base_url: impl Into<String>, target: Target) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            target,
            retry: RetryPolicy::default(),
            request_timeout: Duration::from_secs(30),
            cancel_timeout: Duration::from_secs(5),
        }
    }

    pub fn from_config(config: &SessionwireConfig, target: Target) -> Self {
        Self::new(config.transport.base_url.clone(), target)
            .with_retry_policy(config.retry.policy())
            .with_request_timeout(config.transport.request_timeout())
            .with_cancel_timeout(config.transport.cancel_timeout())
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_cancel_timeout(mut self, timeout: Duration) -> Self {
        self.cancel_timeout = timeout;
        self
    }

    pub fn target(&self) -> Target {
        self.target
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    fn runs_url(&self) -> String {
        format!("{}{}", self.base_url, self.target.runs_path())
    }

    fn run_url(&self, run_id: &str, action: &str) -> String {
        format!("{}/{run_id}/{action}", self.runs_url())
    }

    /// Submits a run and waits for its acknowledgement, retrying transient
    /// failures. Every attempt carries the same `Idempotency-Key`.
    pub async fn run_sync(
        &self,
        request: &RunRequest,
        options: &SubmitOptions,
    ) -> Result<RunAccepted, ErrorEnvelope> {
        let key = match &options.idempotency_key {
            Some(key) => key.clone(),
            None => idempotency::derive_key(request).map_err(|err| {
                ErrorEnvelope::new(ErrorKind::BadInput, format!("unserializable request: {err}"))
            })?,
        };
        let timeout = options.timeout.unwrap_or(self.request_timeout);

        with_retry(&self.retry, |attempt| {
            tracing::debug!(attempt, idempotency_key = %key, "submitting run");
            let send = self
                .http
                .post(self.runs_url())
                .header(IDEMPOTENCY_KEY_HEADER, key.as_str())
                .json(request)
                .send();
            attempt_json(send, timeout)
        })
        .await
    }

    /// Best-effort cancellation. Returns whether the server acknowledged it;
    /// a 404 counts as acknowledged. Failures are logged, never returned.
    pub async fn cancel(&self, run_id: &str) -> bool {
        let send = self.http.post(self.run_url(run_id, "cancel")).send();
        match tokio::time::timeout(self.cancel_timeout, send).await {
            Ok(Ok(response)) if response.status().is_success() => true,
            Ok(Ok(response)) if response.status().as_u16() == 404 => {
                tracing::debug!(run_id, "cancel target already gone");
                true
            }
            Ok(Ok(response)) => {
                tracing::warn!(run_id, status = response.status().as_u16(), "cancel rejected");
                false
            }
            Ok(Err(err)) => {
                tracing::warn!(run_id, "cancel failed: {err}");
                false
            }
            Err(_) => {
                tracing::warn!(
                    run_id,
                    timeout_ms = self.cancel_timeout.as_millis() as u64,
                    "cancel timed out"
                );
                false
            }
        }
    }

    /// Fires a cancel in the background so the caller never waits on it.
    pub fn spawn_cancel(&self, run_id: impl Into<String>) -> JoinHandle<bool> {
        let client = self.clone();
        let run_id = run_id.into();
        tokio::spawn(async move { client.cancel(&run_id).await })
    }

    /// Recorded (replay) or final (live) report of a run.
    pub async fn fetch_report(&self, run_id: &str) -> Result<Value, ErrorEnvelope> {
        let url = self.run_url(run_id, "report");
        with_retry(&self.retry, |_| {
            attempt_json(self.http.get(&url).send(), self.request_timeout)
        })
        .await
    }

    /// Opens the event stream of `run_id`, resuming after `last_event_id`.
    ///
    /// The request timeout covers connecting and receiving the response
    /// head; the body is unbounded.
    pub async fn stream_events(
        &self,
        run_id: &str,
        last_event_id: Option<&str>,
    ) -> Result<EventStream, ErrorEnvelope> {
        let mut request = self
            .http
            .get(self.run_url(run_id, "events"))
            .header(reqwest::header::ACCEPT, "text/event-stream");
        if let Some(last_event_id) = last_event_id {
            request = request.header(LAST_EVENT_ID_HEADER, last_event_id);
        }

        let response = match tokio::time::timeout(self.request_timeout, request.send()).await {
            Err(_) => return Err(error_map::timed_out(self.request_timeout.as_millis())),
            Ok(Err(err)) => return Err(error_map::from_transport(&err)),
            Ok(Ok(response)) => response,
        };
        let response = ensure_success(response).await?;

        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        tokio::spawn(pump(response.bytes_stream(), tx));
        Ok(EventStream::new(rx))
    }

    /// Streams `run_id` to its terminal marker, reconnecting on transient
    /// failures and resuming after the last received id.
    ///
    /// Reconnects share the retry policy's attempt budget, which resets after
    /// each received frame. The stream ends after a terminal frame, after a
    /// final error item, or when `cancel` fires.
    pub fn follow(&self, run_id: impl Into<String>, cancel: CancellationToken) -> EventStream {
        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        let client = self.clone();
        let run_id = run_id.into();
        tokio::spawn(async move { client.follow_loop(&run_id, &cancel, &tx).await });
        EventStream::new(rx)
    }

    async fn follow_loop(
        &self,
        run_id: &str,
        cancel: &CancellationToken,
        tx: &mpsc::Sender<FrameResult>,
    ) {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut last_id: Option<String> = None;
        let mut failures: u32 = 0;

        loop {
            let opened = self
                .stream_events(run_id, last_id.as_deref())
                .or_cancel(cancel)
                .await;
            let failure = match opened {
                Err(_) => return,
                Ok(Err(err)) => err,
                Ok(Ok(mut events)) => loop {
                    let next = match events.next().or_cancel(cancel).await {
                        Err(_) => return,
                        Ok(next) => next,
                    };
                    match next {
                        Some(Ok(frame)) => {
                            failures = 0;
                            if !frame.id.is_empty() {
                                last_id = Some(frame.id.clone());
                            }
                            let terminal = frame.is_terminal();
                            if tx.send(Ok(frame)).await.is_err() || terminal {
                                return;
                            }
                        }
                        Some(Err(err)) => break err,
                        None => {
                            break ErrorEnvelope::new(
                                ErrorKind::NetworkError,
                                "event stream closed before a terminal event",
                            );
                        }
                    }
                },
            };

            failures += 1;
            if !failure.is_retryable() || failures >= max_attempts {
                tracing::warn!(run_id, failures, "giving up on event stream: {failure}");
                let _ = tx.send(Err(failure)).await;
                return;
            }

            let delay = backoff_delay(&self.retry, failures - 1);
            tracing::info!(
                run_id,
                ?last_id,
                delay_ms = delay.as_millis() as u64,
                "reconnecting event stream: {failure}"
            );
            if pause(delay, cancel).await.is_cancelled() {
                return;
            }
        }
    }
}

/// One attempt: send, bounded by `timeout`, then decode a JSON body.
async fn attempt_json<T, F>(send: F, timeout: Duration) -> Result<T, ErrorEnvelope>
where
    T: DeserializeOwned,
    F: std::future::Future<Output = Result<reqwest::Response, reqwest::Error>>,
{
    let exchange = async {
        let response = send.await.map_err(|err| error_map::from_transport(&err))?;
        let response = ensure_success(response).await?;
        let body = response
            .json::<T>()
            .await
            .map_err(|err| error_map::from_transport(&err))?;
        Ok::<T, ErrorEnvelope>(body)
    };
    match tokio::time::timeout(timeout, exchange).await {
        Ok(result) => result,
        Err(_) => Err(error_map::timed_out(timeout.as_millis())),
    }
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ErrorEnvelope> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let headers = response.headers().clone();
    let body = response.text().await.unwrap_or_default();
    Err(error_map::from_status(status.as_u16(), &headers, &body))
}
