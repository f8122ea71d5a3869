//! HTTP replay endpoint.
//!
//! - `POST /v1/replay/runs` - admission check, then start a session
//! - `GET /v1/replay/runs/:run_id/events` - SSE stream, honors `Last-Event-ID`
//! - `POST /v1/replay/runs/:run_id/cancel` - always acknowledged
//! - `GET /v1/replay/runs/:run_id/report` - recorded final report
//! - `GET /healthz` - liveness
//!
//! The replay routes are only mounted when the gate is open.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{Stream, StreamExt};
use serde_json::json;
use sessionwire_protocol::{
    CLIENT_ORIGIN_HEADER, CancelAck, ErrorBody, ErrorEnvelope, ErrorKind, LAST_EVENT_ID_HEADER,
    RunAccepted, RunRequest, StreamFrame,
};
use sessionwire_quota::{Admission, QuotaGuard};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::error::ReplayError;
use crate::session::ReplayManager;
use crate::snapshot::is_frame_safe;
use crate::streamer::{ReplayStreamer, StreamSettings};

/// Origin used when a caller does not identify itself.
pub const ANONYMOUS_ORIGIN: &str = "anonymous";

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<ReplayManager>,
    pub quota: Arc<QuotaGuard>,
    pub stream: StreamSettings,
    pub keep_alive: Duration,
}

impl AppState {
    pub fn new(manager: Arc<ReplayManager>, quota: Arc<QuotaGuard>) -> Self {
        Self {
            manager,
            quota,
            stream: StreamSettings::default(),
            keep_alive: Duration::from_secs(15),
        }
    }

    pub fn with_stream_settings(mut self, stream: StreamSettings) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }
}

/// Builds the router. Replay routes are absent when replay is gated off.
pub fn router(state: AppState, max_body_bytes: usize) -> Router {
    let mut app = Router::new().route("/healthz", get(healthz));

    if state.manager.gate().is_enabled() {
        app = app
            .route("/v1/replay/runs", post(start_run))
            .route("/v1/replay/runs/:run_id/events", get(stream_events))
            .route("/v1/replay/runs/:run_id/cancel", post(cancel_run))
            .route("/v1/replay/runs/:run_id/report", get(get_report));
    } else {
        tracing::info!(gate = ?state.manager.gate(), "replay routes not mounted");
    }

    app.layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(state)
}

/// Serves `app` until `shutdown` fires.
pub async fn serve(
    listener: TcpListener,
    app: Router,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
}

/// Error response carrying `{"error": ErrorEnvelope}`.
#[derive(Debug)]
pub struct ApiError(pub ErrorEnvelope);

impl From<ReplayError> for ApiError {
    fn from(err: ReplayError) -> Self {
        if err.status() >= 500 {
            tracing::error!("replay request failed: {err}");
        }
        Self(err.to_envelope())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self
            .0
            .status
            .and_then(|status| StatusCode::from_u16(status).ok())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let retry_after = self.0.retry_after_seconds;
        let mut response = (status, Json(ErrorBody::from(self.0))).into_response();
        if let Some(seconds) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(seconds));
        }
        response
    }
}

async fn healthz() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn start_run(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<RunRequest>, JsonRejection>,
) -> Result<Json<RunAccepted>, ApiError> {
    let Json(request) = body.map_err(|rejection| {
        ApiError(
            ErrorEnvelope::new(ErrorKind::BadInput, rejection.body_text())
                .with_status(StatusCode::BAD_REQUEST.as_u16()),
        )
    })?;
    let run_id = request.run_id.filter(|id| !id.is_empty()).ok_or_else(|| {
        ApiError(
            ErrorEnvelope::new(ErrorKind::BadInput, "runId is required")
                .with_field("runId")
                .with_status(StatusCode::BAD_REQUEST.as_u16()),
        )
    })?;

    let origin = header_str(&headers, CLIENT_ORIGIN_HEADER).unwrap_or(ANONYMOUS_ORIGIN);
    let estimated_tokens = request.estimated_tokens.unwrap_or(0);
    if let Admission::Rejected {
        kind,
        retry_after_seconds,
    } = state.quota.check(origin, estimated_tokens).await
    {
        let mut envelope = ErrorEnvelope::new(ErrorKind::RateLimited, format!("{kind} quota exceeded"))
            .with_status(StatusCode::TOO_MANY_REQUESTS.as_u16())
            .with_details(json!({ "quota": kind }));
        if let Some(seconds) = retry_after_seconds {
            envelope = envelope.with_retry_after(seconds);
        }
        return Err(ApiError(envelope));
    }

    let accepted = state.manager.start(&run_id).await?;
    Ok(Json(accepted))
}

async fn stream_events(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    if !state.manager.contains(&run_id).await {
        return Err(ReplayError::SessionNotFound(run_id).into());
    }
    let last_event_id = header_str(&headers, LAST_EVENT_ID_HEADER).map(str::to_string);
    tracing::debug!(run_id, ?last_event_id, "opening replay stream");

    let streamer =
        ReplayStreamer::open(Arc::clone(&state.manager), run_id, state.stream, last_event_id)
            .await;
    let events = streamer
        .into_stream()
        .map(|frame| Ok::<_, Infallible>(sse_event(frame)));

    Ok(Sse::new(events).keep_alive(
        KeepAlive::new()
            .interval(state.keep_alive)
            .text("keep-alive"),
    ))
}

async fn cancel_run(State(state): State<AppState>, Path(run_id): Path<String>) -> Json<CancelAck> {
    Json(state.manager.cancel(&run_id).await)
}

async fn get_report(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    Ok(Json(state.manager.report(&run_id).await?))
}

/// Frames loaded from snapshots are already frame-safe; anything else has
/// its line breaks and NULs stripped, since axum panics on them.
fn sse_event(frame: StreamFrame) -> Event {
    let id = scrub_field(frame.id);
    let event = Event::default()
        .event(scrub_field(frame.event))
        .data(frame.data.replace('\r', ""));
    if id.is_empty() {
        event
    } else {
        event.id(id)
    }
}

fn scrub_field(value: String) -> String {
    if is_frame_safe(&value) {
        value
    } else {
        value.chars().filter(|c| !matches!(c, '\r' | '\n' | '\0')).collect()
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}
