//! Job worker.

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use jobhive_core::{JobArgs, JobFailure, JobId, JobOutcome, Resilience, StoreResult, codec, fields};
use jobhive_storage::JobStorage;

use crate::error::PerformError;
use crate::performer::{JobInvocation, PerformerRegistry};

const JOB_FIELDS: &[&str] = &[fields::TYPE, fields::ARGS];

/// Counters shared by every worker of a server.
#[derive(Debug, Default)]
pub struct WorkerStats {
    succeeded: AtomicU64,
    failed: AtomicU64,
}

impl WorkerStats {
    pub fn succeeded(&self) -> u64 {
        self.succeeded.load(Ordering::SeqCst)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::SeqCst)
    }
}

/// Everything a worker shares with its server.
#[derive(Clone)]
pub struct WorkerContext {
    pub server: String,
    pub queue: String,
    pub storage: JobStorage,
    pub registry: Arc<PerformerRegistry>,
    pub resilience: Resilience,
    pub dequeue_timeout: Duration,
    pub stats: Arc<WorkerStats>,
}

/// Pulls jobs from one queue and runs them one at a time.
pub struct Worker {
    index: usize,
    ctx: WorkerContext,
}

impl Worker {
    pub fn new(index: usize, ctx: WorkerContext) -> Self {
        Self { index, ctx }
    }

    /// Run until `cancel` fires.
    ///
    /// A fatal store error cancels `cancel`, which stops every sibling task,
    /// and is returned.
    pub async fn run(self, cancel: CancellationToken) -> StoreResult<()> {
        info!(worker = self.index, server = %self.ctx.server, queue = %self.ctx.queue, "Worker started");

        while !cancel.is_cancelled() {
            match self.run_once(&cancel).await {
                Ok(_) => {}
                Err(err) if err.is_cancelled() => break,
                Err(err) if err.is_fatal() => {
                    error!(worker = self.index, server = %self.ctx.server, error = %err, "Store is inconsistent, halting server");
                    cancel.cancel();
                    return Err(err);
                }
                Err(err) => {
                    error!(worker = self.index, error = %err, "Worker iteration failed");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.ctx.dequeue_timeout) => {}
                    }
                }
            }
        }

        info!(worker = self.index, server = %self.ctx.server, "Worker stopped");
        Ok(())
    }

    /// Wait for one job and process it. Returns `false` when the wait timed out.
    pub async fn run_once(&self, cancel: &CancellationToken) -> StoreResult<bool> {
        let storage = &self.ctx.storage;
        let (server, queue) = (self.ctx.server.as_str(), self.ctx.queue.as_str());
        let timeout = self.ctx.dequeue_timeout;
        let dequeued = self
            .ctx
            .resilience
            .run("dequeue", cancel, move || storage.dequeue(server, queue, timeout))
            .await?;
        let Some(id) = dequeued else {
            return Ok(false);
        };

        self.process(&id, cancel).await?;
        Ok(true)
    }

    async fn process(&self, id: &JobId, cancel: &CancellationToken) -> StoreResult<()> {
        let storage = &self.ctx.storage;
        let (server, queue) = (self.ctx.server.as_str(), self.ctx.queue.as_str());

        let values = self
            .ctx
            .resilience
            .run("load job", cancel, move || storage.get_selected(id, JOB_FIELDS))
            .await?;
        let mut values = values.into_iter();
        let Some(job_type) = values.next().flatten() else {
            warn!(job_id = %id, queue, "Dequeued job has no type, dropping it");
            self.release(id, cancel).await?;
            return Ok(());
        };
        let args = match values.next().flatten() {
            Some(raw) => codec::decode::<JobArgs>(&raw)
                .map_err(|err| PerformError::InvalidArguments(err.to_string())),
            None => Ok(JobArgs::new()),
        };

        self.ctx.resilience
            .run("begin processing", cancel, move || {
                storage.begin_processing(server, queue, id)
            })
            .await?;

        let result = match args {
            Ok(args) => {
                self.perform(JobInvocation {
                    id: id.clone(),
                    job_type,
                    queue: queue.to_string(),
                    args,
                    cancel: cancel.child_token(),
                })
                .await
            }
            Err(err) => Err(err),
        };

        let outcome = match result {
            Ok(()) => {
                self.ctx.stats.succeeded.fetch_add(1, Ordering::SeqCst);
                debug!(job_id = %id, worker = self.index, "Job succeeded");
                JobOutcome::Succeeded
            }
            Err(err) => {
                self.ctx.stats.failed.fetch_add(1, Ordering::SeqCst);
                warn!(job_id = %id, worker = self.index, error = %err, "Job failed");
                JobOutcome::Failed(failure_of(&err))
            }
        };

        // Recorded even when the server is stopping so the job is not run twice.
        let finish = CancellationToken::new();
        let outcome = &outcome;
        self.ctx.resilience
            .run("end processing", &finish, move || storage.end_processing(id, outcome))
            .await?;
        self.release(id, &finish).await
    }

    async fn perform(&self, job: JobInvocation) -> Result<(), PerformError> {
        let Some(performer) = self.ctx.registry.get(&job.job_type) else {
            return Err(PerformError::UnknownJobType(job.job_type));
        };

        let handle = tokio::spawn(async move { performer.perform(&job).await });
        match handle.await {
            Ok(result) => result,
            Err(err) if err.is_panic() => {
                Err(PerformError::Panicked(panic_message(err.into_panic())))
            }
            Err(_) => Err(PerformError::Cancelled),
        }
    }

    async fn release(&self, id: &JobId, cancel: &CancellationToken) -> StoreResult<()> {
        let storage = &self.ctx.storage;
        let (server, queue) = (self.ctx.server.as_str(), self.ctx.queue.as_str());
        self.ctx.resilience
            .run("release job", cancel, move || {
                storage.remove_from_processing_list(server, queue, id)
            })
            .await?;
        Ok(())
    }
}

fn failure_of(err: &PerformError) -> JobFailure {
    let mut failure = JobFailure::from_error(err);
    failure.kind = err.kind().to_string();
    failure
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
