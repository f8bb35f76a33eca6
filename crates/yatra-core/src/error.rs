//! Error types for yatra-core

use thiserror::Error;

/// Result type alias using yatra-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in yatra-core operations
///
/// A duplicate scan is not an error: it is reported through
/// [`SubmitReceipt::duplicate`](crate::models::SubmitReceipt).
#[derive(Error, Debug)]
pub enum Error {
    /// Unknown participant/checkpoint or malformed input. Terminal, never retried.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Store or network unavailable. Callers retry with backoff.
    #[error("Transient error: {0}")]
    Transient(String),

    /// A scan id was reused with a different payload, or the store holds a
    /// duplicate pair. Indicates a bug in the storage layer.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// `SQLite` error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transient(_) | Self::Io(_) => true,
            Self::Sqlite(rusqlite::Error::SqliteFailure(failure, _)) => matches!(
                failure.code,
                rusqlite::ErrorCode::DatabaseBusy
                    | rusqlite::ErrorCode::DatabaseLocked
                    | rusqlite::ErrorCode::CannotOpen
            ),
            _ => false,
        }
    }

    pub(crate) fn poisoned(what: &str) -> Self {
        Self::Transient(format!("{what} lock poisoned"))
    }
}
