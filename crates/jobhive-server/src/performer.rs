//! Job performers and their registry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use jobhive_core::{JobArgs, JobId, codec};

use crate::error::PerformError;

/// One job run as seen by its performer.
#[derive(Debug, Clone)]
pub struct JobInvocation {
    pub id: JobId,
    pub job_type: String,
    pub queue: String,
    pub args: JobArgs,
    /// Fires when the server is stopping.
    pub cancel: CancellationToken,
}

impl JobInvocation {
    /// Decode a required argument.
    pub fn arg<T: DeserializeOwned>(&self, name: &str) -> Result<T, PerformError> {
        self.arg_opt(name)?
            .ok_or_else(|| PerformError::MissingArgument(name.to_string()))
    }

    /// Decode an optional argument.
    pub fn arg_opt<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, PerformError> {
        let Some(raw) = self.args.get(name) else {
            return Ok(None);
        };
        codec::decode(raw)
            .map(Some)
            .map_err(|err| match err {
                jobhive_core::StoreError::Serialization(source) => PerformError::InvalidArgument {
                    name: name.to_string(),
                    source,
                },
                other => PerformError::Failed(other.to_string()),
            })
    }
}

/// Executes jobs of one type.
#[async_trait]
pub trait JobPerformer: Send + Sync {
    async fn perform(&self, job: &JobInvocation) -> Result<(), PerformError>;
}

/// Maps job types to performers.
#[derive(Default, Clone)]
pub struct PerformerRegistry {
    performers: HashMap<String, Arc<dyn JobPerformer>>,
}

impl PerformerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `performer` for `job_type`, replacing any previous one.
    pub fn register(&mut self, job_type: impl Into<String>, performer: Arc<dyn JobPerformer>) {
        self.performers.insert(job_type.into(), performer);
    }

    pub fn get(&self, job_type: &str) -> Option<Arc<dyn JobPerformer>> {
        self.performers.get(job_type).cloned()
    }

    pub fn contains(&self, job_type: &str) -> bool {
        self.performers.contains_key(job_type)
    }

    pub fn len(&self) -> usize {
        self.performers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.performers.is_empty()
    }

    pub fn job_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.performers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}
