//! Server and job execution errors.

use std::time::Duration;

use thiserror::Error;

use jobhive_core::StoreError;

/// Errors raised by the server lifecycle.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid server configuration: {0}")]
    InvalidConfig(String),

    #[error("Server is already running")]
    AlreadyRunning,

    #[error("Server is not running")]
    NotRunning,

    /// A worker or the poller hit a fatal store error and stopped the server.
    #[error("Server halted: {0}")]
    Halted(#[source] StoreError),

    /// Some tasks were still busy when the shutdown window closed.
    #[error("Shutdown did not complete within {0:?}")]
    ShutdownTimeout(Duration),
}

/// Why a job run failed.
#[derive(Debug, Error)]
pub enum PerformError {
    #[error("Missing argument: {0}")]
    MissingArgument(String),

    #[error("Invalid argument {name}: {source}")]
    InvalidArgument {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid argument bag: {0}")]
    InvalidArguments(String),

    #[error("No performer registered for job type {0}")]
    UnknownJobType(String),

    #[error("Job panicked: {0}")]
    Panicked(String),

    #[error("Job was cancelled")]
    Cancelled,

    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl PerformError {
    /// Short name recorded as the failure type.
    pub fn kind(&self) -> &'static str {
        match self {
            PerformError::MissingArgument(_) => "MissingArgument",
            PerformError::InvalidArgument { .. } => "InvalidArgument",
            PerformError::InvalidArguments(_) => "InvalidArguments",
            PerformError::UnknownJobType(_) => "UnknownJobType",
            PerformError::Panicked(_) => "Panicked",
            PerformError::Cancelled => "Cancelled",
            PerformError::Failed(_) => "Failed",
            PerformError::Other(_) => "Error",
        }
    }
}

pub type ServerResult<T> = Result<T, ServerError>;
