//! Shared types for the streaming-session subsystem.
//!
//! Everything that crosses a crate or process boundary lives here: recorded
//! events, the normalized [`ErrorEnvelope`], the SSE frame codec, HTTP bodies
//! and the process-wide [`RetryPolicy`].

pub mod api;
pub mod error;
pub mod event;
pub mod retry_policy;
pub mod wire;

pub use api::{CancelAck, RunAccepted, RunRequest};
pub use error::{ErrorBody, ErrorEnvelope, ErrorKind};
pub use event::RecordedEvent;
pub use retry_policy::RetryPolicy;
pub use wire::StreamFrame;

/// Header carrying the idempotency key of a run submission.
pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

/// Header a resuming stream consumer uses to report the last processed id.
pub const LAST_EVENT_ID_HEADER: &str = "last-event-id";

/// Header identifying the calling origin for admission control.
pub const CLIENT_ORIGIN_HEADER: &str = "x-client-origin";
