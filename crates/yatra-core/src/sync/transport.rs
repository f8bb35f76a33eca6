//! The seam between a device and the canonical side

use async_trait::async_trait;
use thiserror::Error;

use crate::error::Error;
use crate::models::{Checkpoint, Participant, ScanCursor, ScanLogPage, ScanSubmission, SubmitReceipt};

/// Failure of one remote call, classified by what the agent should do next
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The server refused the request. Terminal for that scan.
    #[error("Rejected: {0}")]
    Validation(String),
    /// Unreachable, timed out, or the store is down. Retry later.
    #[error("Unavailable: {0}")]
    Transient(String),
    /// The server reports an id reused with a different payload
    #[error("Conflict: {0}")]
    Conflict(String),
}

impl TransportError {
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<Error> for TransportError {
    fn from(error: Error) -> Self {
        match error {
            Error::Validation(message) => Self::Validation(message),
            Error::Conflict(message) => Self::Conflict(message),
            other => Self::Transient(other.to_string()),
        }
    }
}

pub type TransportResult<T> = Result<T, TransportError>;

/// Calls a device makes against the ingestion and query endpoints
#[async_trait]
pub trait SyncTransport: Send + Sync {
    async fn submit_scan(&self, submission: &ScanSubmission) -> TransportResult<SubmitReceipt>;

    async fn list_participants(&self) -> TransportResult<Vec<Participant>>;

    async fn list_checkpoints(&self) -> TransportResult<Vec<Checkpoint>>;

    /// Entries after `since`, at most `limit`
    async fn list_scan_logs(&self, since: ScanCursor, limit: usize)
        -> TransportResult<ScanLogPage>;
}
