//! Worker coordination.
//!
//! Servers announce themselves, claim jobs through leases and, on restart,
//! push anything left on their processing lists back onto the live queues.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use jobhive_core::{Batch, JobId, StoreResult, codec, fields};

use crate::storage::JobStorage;

pub(crate) const LEASE_SERVER: &str = "server";
pub(crate) const LEASE_QUEUE: &str = "queue";
pub(crate) const LEASE_STARTED_AT: &str = "started-at";

pub(crate) const SERVER_NAME: &str = "server-name";
pub(crate) const SERVER_CONCURRENCY: &str = "concurrency";
pub(crate) const SERVER_QUEUE: &str = "queue";
pub(crate) const SERVER_STARTED_AT: &str = "started-at";

/// Ownership record of an in-flight job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobLease {
    pub job_id: JobId,
    pub server: String,
    pub queue: String,
    pub started_at: Option<DateTime<Utc>>,
}

impl JobStorage {
    /// Register a server and bind it to `queue`.
    pub async fn announce(&self, server: &str, concurrency: u32, queue: &str) -> StoreResult<()> {
        let mut batch = Batch::new();
        batch
            .sadd(self.keys.servers(), server)
            .hset_many(
                self.keys.server(server),
                [
                    (SERVER_NAME, server.to_string()),
                    (SERVER_CONCURRENCY, concurrency.to_string()),
                    (SERVER_QUEUE, queue.to_string()),
                    (SERVER_STARTED_AT, codec::encode_time(self.now())),
                ],
            )
            .sadd(self.keys.queue_servers(queue), server);
        self.store.exec(batch).await?;

        info!(server, concurrency, queue, "Server announced");
        Ok(())
    }

    /// Remove a server's registration.
    pub async fn retire(&self, server: &str, queue: &str) -> StoreResult<()> {
        let mut batch = Batch::new();
        batch
            .srem(self.keys.servers(), server)
            .del(self.keys.server(server))
            .srem(self.keys.queue_servers(queue), server);
        self.store.exec(batch).await?;

        info!(server, queue, "Server retired");
        Ok(())
    }

    /// Move every job left on this server's processing lists back to its queue.
    ///
    /// Scans each queue the server was bound to, plus `current_queue`. Stops at
    /// the next item boundary once `cancel` fires; otherwise rebinds the
    /// server to `current_queue` alone. Returns the number of jobs moved.
    pub async fn recover_processing(
        &self,
        server: &str,
        current_queue: &str,
        cancel: &CancellationToken,
    ) -> StoreResult<usize> {
        let server_queues_key = self.keys.server_queues(server);
        let mut queues: BTreeSet<String> = self
            .store
            .smembers(&server_queues_key)
            .await?
            .into_iter()
            .collect();
        queues.insert(current_queue.to_string());

        let mut recovered = 0usize;
        'queues: for queue in &queues {
            let processing = self.keys.processing_list(server, queue);
            let target = self.keys.queue(queue);
            loop {
                if cancel.is_cancelled() {
                    break 'queues;
                }
                let Some(head) = self.store.lrange(&processing, 0, 0).await?.pop() else {
                    break;
                };
                let id = JobId::from(head);
                // Once the id is back on the queue another server may lease it.
                self.release_lease(server, &id).await?;
                if self.store.move_item(&processing, &target).await?.is_none() {
                    break;
                }
                recovered += 1;
                debug!(job_id = %id, server, queue = %queue, "Requeued job left in flight");
            }
        }

        if cancel.is_cancelled() {
            warn!(server, recovered, "Recovery cancelled before completion");
            return Ok(recovered);
        }

        let mut batch = Batch::new();
        batch
            .del(&server_queues_key)
            .sadd(&server_queues_key, current_queue);
        self.store.exec(batch).await?;

        if recovered > 0 {
            info!(server, recovered, "Recovered jobs left in flight");
        }
        Ok(recovered)
    }

    /// Mark a dequeued job as running on `server`.
    pub async fn begin_processing(&self, server: &str, queue: &str, id: &JobId) -> StoreResult<()> {
        let started_at = codec::encode_time(self.now());
        let mut batch = Batch::new();
        batch
            .incr(self.keys.stats_processing())
            .sadd(self.keys.processing_set(), id.as_str())
            .hset_many(
                self.keys.job(id.as_str()),
                [
                    (fields::STARTED_AT, started_at.clone()),
                    (fields::SERVER_NAME, server.to_string()),
                ],
            )
            .hset_many(
                self.keys.lease(id.as_str()),
                [
                    (LEASE_SERVER, server.to_string()),
                    (LEASE_QUEUE, queue.to_string()),
                    (LEASE_STARTED_AT, started_at),
                ],
            );
        self.store.exec(batch).await?;

        debug!(job_id = %id, server, queue, "Processing started");
        Ok(())
    }

    /// Drop one occurrence of `id` from the server's processing list.
    pub async fn remove_from_processing_list(
        &self,
        server: &str,
        queue: &str,
        id: &JobId,
    ) -> StoreResult<bool> {
        let removed = self
            .store
            .lrem(&self.keys.processing_list(server, queue), 1, id.as_str())
            .await?;
        Ok(removed > 0)
    }

    /// Current lease of a job, if it is in flight.
    pub async fn lease(&self, id: &JobId) -> StoreResult<Option<JobLease>> {
        let lease = self.store.hgetall(&self.keys.lease(id.as_str())).await?;
        let (Some(server), Some(queue)) = (lease.get(LEASE_SERVER), lease.get(LEASE_QUEUE)) else {
            return Ok(None);
        };
        Ok(Some(JobLease {
            job_id: id.clone(),
            server: server.clone(),
            queue: queue.clone(),
            started_at: lease
                .get(LEASE_STARTED_AT)
                .and_then(|raw| codec::decode_time(raw)),
        }))
    }

    /// Undo `begin_processing` for a job held by `server`.
    async fn release_lease(&self, server: &str, id: &JobId) -> StoreResult<bool> {
        let lease_key = self.keys.lease(id.as_str());
        let mut session = self.store.watch(std::slice::from_ref(&lease_key)).await?;
        let owner = session.hget(&lease_key, LEASE_SERVER).await?;
        if owner.as_deref() != Some(server) {
            session.unwatch().await?;
            return Ok(false);
        }

        let mut batch = Batch::new();
        batch
            .del(&lease_key)
            .decr(self.keys.stats_processing())
            .srem(self.keys.processing_set(), id.as_str());
        let released = session.commit(batch).await?;
        if !released {
            warn!(job_id = %id, server, "Lease changed while releasing it");
        }
        Ok(released)
    }
}

#[cfg(test)]
#[path = "coordination_tests.rs"]
mod tests;
