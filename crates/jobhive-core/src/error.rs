//! Store errors.

use thiserror::Error;

/// Store error types.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store answered with something we cannot interpret. Never retried.
    #[error("Malformed store response: {0}")]
    Malformed(String),

    /// An I/O operation was cut short.
    #[error("Store I/O interrupted: {0}")]
    Interrupted(String),

    /// The connection to the store failed or was dropped.
    #[error("Store connection error: {0}")]
    Connection(String),

    /// The operation was cancelled by its caller.
    #[error("Operation cancelled")]
    Cancelled,

    /// The backoff budget ran out before the operation succeeded.
    #[error("{operation} failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        last: Box<StoreError>,
    },

    /// Value encoding or decoding failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Whether the failure is transient and the operation may be attempted again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Interrupted(_) | StoreError::Connection(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, StoreError::Cancelled)
    }

    /// Whether the store holds data we cannot trust. Servers halt on these.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StoreError::Malformed(_))
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
