//! Deterministic replay of recorded analysis runs.
//!
//! A recorded run is an NDJSON event log plus a final report on disk
//! ([`snapshot`]). The [`session::ReplayManager`] turns a log into a session
//! that is drained in batches, [`streamer::ReplayStreamer`] paces those
//! batches into wire frames, and [`server`] exposes the whole thing over HTTP
//! with the same framing a live backend uses.

pub mod error;
pub mod gate;
pub mod server;
pub mod session;
pub mod snapshot;
pub mod streamer;

pub use error::{ReplayError, Result};
pub use gate::{DisabledReason, ReplayGate};
pub use server::{AppState, router, serve};
pub use session::{NextBatch, ReplayManager, ReplaySession};
pub use snapshot::{LoadedLog, SnapshotDir};
pub use streamer::{ReplayStreamer, StreamSettings};
