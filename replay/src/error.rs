use std::path::PathBuf;

use sessionwire_protocol::{ErrorEnvelope, ErrorKind};
use thiserror::Error;

/// Errors produced by snapshot loading and the session manager.
#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("a replay session for run {0} already exists")]
    AlreadyExists(String),

    #[error("invalid run id {0:?}: only [A-Za-z0-9._-] is allowed")]
    InvalidRunId(String),

    #[error("no recorded log for run {0}")]
    NotFound(String),

    #[error("no replay session for run {0}")]
    SessionNotFound(String),

    #[error("recorded log for run {0} contains no events")]
    EmptyLog(String),

    #[error("replay is disabled in this deployment")]
    Disabled,

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("recorded report for run {run_id} is not valid JSON: {source}")]
    InvalidReport {
        run_id: String,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, ReplayError>;

impl ReplayError {
    /// HTTP status the replay endpoint answers with.
    pub fn status(&self) -> u16 {
        match self {
            ReplayError::AlreadyExists(_) | ReplayError::InvalidRunId(_) => 400,
            ReplayError::NotFound(_)
            | ReplayError::SessionNotFound(_)
            | ReplayError::EmptyLog(_)
            | ReplayError::Disabled => 404,
            ReplayError::Io { .. } | ReplayError::InvalidReport { .. } => 500,
        }
    }

    pub fn to_envelope(&self) -> ErrorEnvelope {
        let status = self.status();
        let envelope = match self {
            ReplayError::AlreadyExists(_) | ReplayError::InvalidRunId(_) => {
                ErrorEnvelope::new(ErrorKind::BadInput, self.to_string()).with_field("runId")
            }
            ReplayError::NotFound(_)
            | ReplayError::SessionNotFound(_)
            | ReplayError::EmptyLog(_)
            | ReplayError::Disabled => ErrorEnvelope::new(ErrorKind::NotFound, self.to_string()),
            ReplayError::Io { .. } | ReplayError::InvalidReport { .. } => {
                ErrorEnvelope::new(ErrorKind::ServerError, self.to_string())
            }
        };
        envelope.with_status(status)
    }
}
