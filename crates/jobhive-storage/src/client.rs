//! Producer-side helpers for creating jobs.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use jobhive_core::{JobArgs, JobFields, JobId, StoreResult, codec, fields};

use crate::storage::JobStorage;

/// Builds an argument bag, encoding each value as JSON.
#[derive(Debug, Default, Clone)]
pub struct ArgsBuilder {
    args: JobArgs,
}

impl ArgsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arg<T: Serialize + ?Sized>(mut self, name: &str, value: &T) -> StoreResult<Self> {
        self.args.insert(name.to_string(), codec::encode(value)?);
        Ok(self)
    }

    pub fn build(self) -> JobArgs {
        self.args
    }
}

/// Creates job records and hands them to the queue engine.
#[derive(Clone)]
pub struct JobClient {
    storage: JobStorage,
}

impl JobClient {
    pub fn new(storage: JobStorage) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &JobStorage {
        &self.storage
    }

    /// Create a job and put it at the tail of `queue`.
    pub async fn enqueue(&self, queue: &str, job_type: &str, args: &JobArgs) -> StoreResult<JobId> {
        let id = JobId::generate();
        let record = Self::record(job_type, args)?;
        self.storage.enqueue(queue, &id, Some(&record)).await?;

        info!(job_id = %id, job_type, queue, "Job created");
        Ok(id)
    }

    /// Create a job that becomes due at `at`.
    pub async fn schedule(
        &self,
        queue: &str,
        job_type: &str,
        args: &JobArgs,
        at: DateTime<Utc>,
    ) -> StoreResult<JobId> {
        let id = JobId::generate();
        let record = Self::record(job_type, args)?;
        self.storage.schedule(&id, Some(&record), queue, at).await?;

        info!(job_id = %id, job_type, queue, at = %at, "Job scheduled");
        Ok(id)
    }

    /// Create a job that becomes due after `delay`.
    pub async fn schedule_in(
        &self,
        queue: &str,
        job_type: &str,
        args: &JobArgs,
        delay: chrono::Duration,
    ) -> StoreResult<JobId> {
        let at = self.storage.now() + delay;
        self.schedule(queue, job_type, args, at).await
    }

    fn record(job_type: &str, args: &JobArgs) -> StoreResult<JobFields> {
        let mut record = JobFields::new();
        record.insert(fields::TYPE.to_string(), job_type.to_string());
        record.insert(fields::ARGS.to_string(), codec::encode(args)?);
        Ok(record)
    }
}
