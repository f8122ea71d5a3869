//! Resilient transport between the UI and an analysis backend.
//!
//! [`TransportClient`] talks to either a live backend or a replay server with
//! the same API. Every failure a caller sees is a single
//! [`ErrorEnvelope`](sessionwire_protocol::ErrorEnvelope); transient ones are
//! absorbed by [`with_retry`] first.

mod client;
pub mod error_map;
pub mod idempotency;
pub mod retry;
mod stream;

pub use client::{SubmitOptions, Target, TransportClient};
pub use retry::{backoff_delay, with_retry};
pub use stream::{EventStream, FrameResult};
