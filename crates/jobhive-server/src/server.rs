//! Job server lifecycle.
//!
//! A server announces itself, requeues whatever a previous run of the same
//! server left in flight, then runs `concurrency` workers plus a schedule
//! poller until stopped. A fatal store error in any task halts the whole
//! server; `stop` then reports it as [`ServerError::Halted`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use jobhive_config::{RetryConfig, ServerConfig};
use jobhive_core::{Resilience, StoreError, StoreResult};
use jobhive_storage::JobStorage;

use crate::error::{ServerError, ServerResult};
use crate::performer::PerformerRegistry;
use crate::scheduler::SchedulePoller;
use crate::worker::{Worker, WorkerContext, WorkerStats};

pub struct JobServer {
    name: String,
    queue: String,
    concurrency: u32,
    poll_interval: Duration,
    dequeue_timeout: Duration,
    shutdown_timeout: Duration,
    storage: JobStorage,
    registry: Arc<PerformerRegistry>,
    resilience: Resilience,
    stats: Arc<WorkerStats>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<StoreResult<()>>>,
}

impl JobServer {
    pub fn new(
        storage: JobStorage,
        registry: PerformerRegistry,
        server: &ServerConfig,
        retry: &RetryConfig,
    ) -> ServerResult<Self> {
        if server.concurrency == 0 {
            return Err(ServerError::InvalidConfig("concurrency must be > 0".to_string()));
        }
        if server.queue.is_empty() {
            return Err(ServerError::InvalidConfig("queue must not be empty".to_string()));
        }

        let name = server
            .name
            .clone()
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| format!("server-{}", Uuid::new_v4().simple()));

        Ok(Self {
            name,
            queue: server.queue.clone(),
            concurrency: server.concurrency,
            poll_interval: server.poll_interval(),
            dequeue_timeout: server.dequeue_timeout(),
            shutdown_timeout: server.shutdown_timeout(),
            storage,
            registry: Arc::new(registry),
            resilience: Resilience::new(retry),
            stats: Arc::new(WorkerStats::default()),
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn is_running(&self) -> bool {
        !self.tasks.is_empty()
    }

    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    /// Whether a task stopped the server after a fatal store error.
    pub fn is_halted(&self) -> bool {
        self.is_running() && self.cancel.is_cancelled()
    }

    /// Announce, recover and spawn workers and the poller.
    pub async fn start(&mut self) -> ServerResult<()> {
        if self.is_running() {
            return Err(ServerError::AlreadyRunning);
        }
        self.cancel = CancellationToken::new();

        let recovered = {
            let storage = &self.storage;
            let (name, queue, concurrency) = (self.name.as_str(), self.queue.as_str(), self.concurrency);
            let cancel = &self.cancel;
            self.resilience
                .run("announce server", cancel, move || {
                    storage.announce(name, concurrency, queue)
                })
                .await?;
            self.resilience
                .run("recover processing", cancel, move || {
                    storage.recover_processing(name, queue, cancel)
                })
                .await?
        };

        let context = WorkerContext {
            server: self.name.clone(),
            queue: self.queue.clone(),
            storage: self.storage.clone(),
            registry: self.registry.clone(),
            resilience: self.resilience.clone(),
            dequeue_timeout: self.dequeue_timeout,
            stats: self.stats.clone(),
        };
        for index in 0..self.concurrency as usize {
            let worker = Worker::new(index, context.clone());
            self.tasks.push(tokio::spawn(worker.run(self.cancel.clone())));
        }

        let poller = SchedulePoller::new(
            self.storage.clone(),
            self.resilience.clone(),
            self.poll_interval,
        );
        self.tasks.push(tokio::spawn(poller.run(self.cancel.clone())));

        info!(
            server = %self.name,
            queue = %self.queue,
            concurrency = self.concurrency,
            recovered,
            "Job server started"
        );
        Ok(())
    }

    /// Signal every task to stop, wait up to the shutdown timeout, then retire.
    ///
    /// Tasks still running when the timeout elapses are aborted; their jobs
    /// stay on the processing list and are requeued by the next start.
    pub async fn stop(&mut self) -> ServerResult<()> {
        if !self.is_running() {
            return Err(ServerError::NotRunning);
        }
        info!(server = %self.name, "Stopping job server");
        self.cancel.cancel();

        let tasks = std::mem::take(&mut self.tasks);
        let aborts: Vec<_> = tasks.iter().map(JoinHandle::abort_handle).collect();
        let (timed_out, fatal) =
            match tokio::time::timeout(self.shutdown_timeout, join_all(tasks)).await {
                Ok(results) => (false, results.into_iter().find_map(|result| result.ok()?.err())),
                Err(_) => {
                    warn!(server = %self.name, "Shutdown timed out, aborting remaining tasks");
                    for abort in aborts {
                        abort.abort();
                    }
                    (true, None)
                }
            };

        // The server token is already cancelled; retiring runs on its own budget.
        let retired = {
            let storage = &self.storage;
            let (name, queue) = (self.name.as_str(), self.queue.as_str());
            let finish = CancellationToken::new();
            let retire = self
                .resilience
                .run("retire server", &finish, move || storage.retire(name, queue));
            tokio::time::timeout(self.shutdown_timeout, retire)
                .await
                .unwrap_or(Err(StoreError::Cancelled))
        };
        info!(
            server = %self.name,
            succeeded = self.stats.succeeded(),
            failed = self.stats.failed(),
            "Job server stopped"
        );

        if let Some(err) = fatal {
            return Err(ServerError::Halted(err));
        }
        retired?;
        if timed_out {
            return Err(ServerError::ShutdownTimeout(self.shutdown_timeout));
        }
        Ok(())
    }

    /// Start, run until `shutdown` resolves or the server halts, then stop.
    pub async fn run_until<F>(mut self, shutdown: F) -> ServerResult<()>
    where
        F: Future<Output = ()>,
    {
        self.start().await?;
        let halted = self.cancel.clone();
        tokio::select! {
            _ = shutdown => {}
            _ = halted.cancelled() => {
                warn!(server = %self.name, "Job server halted, shutting down");
            }
        }
        self.stop().await
    }
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
