//! Job model.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Field names of a job record.
pub mod fields {
    pub const TYPE: &str = "Type";
    pub const ARGS: &str = "Args";
    pub const QUEUE: &str = "Queue";
    pub const SCHEDULED_AT: &str = "ScheduledAt";
    pub const SCHEDULED_QUEUE: &str = "ScheduledQueue";
    pub const ENQUEUED_AT: &str = "EnqueuedAt";
    pub const STARTED_AT: &str = "StartedAt";
    pub const SERVER_NAME: &str = "ServerName";
    pub const SUCCEEDED_AT: &str = "SucceededAt";
    pub const FAILED_AT: &str = "FailedAt";
    pub const EXCEPTION_TYPE: &str = "ExceptionType";
    pub const EXCEPTION_MESSAGE: &str = "ExceptionMessage";
    pub const EXCEPTION_DETAILS: &str = "ExceptionDetails";
}

/// Opaque job identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

impl From<String> for JobId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl AsRef<str> for JobId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Argument bag: argument name to encoded value.
pub type JobArgs = BTreeMap<String, String>;

/// Raw job record fields: field name to stored value.
pub type JobFields = BTreeMap<String, String>;

/// How a job execution ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded,
    Failed(JobFailure),
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Succeeded)
    }
}

/// Failure description recorded on a failed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    /// Error type name.
    pub kind: String,
    pub message: String,
    /// Source chain or other diagnostic text.
    pub details: String,
}

impl JobFailure {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            details: String::new(),
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = details.into();
        self
    }

    /// Describe an error, walking its source chain into `details`.
    pub fn from_error<E>(err: &E) -> Self
    where
        E: std::error::Error + ?Sized,
    {
        let mut details = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            details.push(format!("caused by: {}", cause));
            source = cause.source();
        }
        Self {
            kind: std::any::type_name::<E>().to_string(),
            message: err.to_string(),
            details: details.join("\n"),
        }
    }
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}
