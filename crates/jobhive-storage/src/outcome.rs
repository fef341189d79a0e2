//! Outcome and stats recorder.

use tracing::{debug, warn};

use jobhive_core::{Batch, JobId, JobOutcome, StatKind, StoreResult, codec, fields};

use crate::coordination::LEASE_SERVER;
use crate::storage::{JobStorage, score};

/// Attempts before a retry or discard gives up on a busy failed set.
const MAX_CONFLICTS: usize = 8;

impl JobStorage {
    /// Record how a job run ended and release its lease.
    ///
    /// Returns `false` without touching anything when the job holds no
    /// lease, which is what a duplicate call sees.
    pub async fn end_processing(&self, id: &JobId, outcome: &JobOutcome) -> StoreResult<bool> {
        let lease_key = self.keys.lease(id.as_str());
        let mut session = self.store.watch(std::slice::from_ref(&lease_key)).await?;
        if !session.hexists(&lease_key, LEASE_SERVER).await? {
            session.unwatch().await?;
            warn!(job_id = %id, "Outcome already recorded or job not in flight");
            return Ok(false);
        }

        let now = self.now();
        let job_key = self.keys.job(id.as_str());
        let mut batch = Batch::new();
        batch
            .decr(self.keys.stats_processing())
            .srem(self.keys.processing_set(), id.as_str())
            .del(&lease_key);

        let kind = match outcome {
            JobOutcome::Succeeded => {
                let succeeded = self.keys.succeeded();
                let keep = self.config.succeeded_list_size.max(1) as isize;
                batch
                    .hset(&job_key, fields::SUCCEEDED_AT, codec::encode_time(now))
                    .expire(&job_key, self.config.job_expiration())
                    .lpush(&succeeded, id.as_str())
                    .ltrim(&succeeded, 0, keep - 1);
                StatKind::Succeeded
            }
            JobOutcome::Failed(failure) => {
                batch
                    .hset_many(
                        &job_key,
                        [
                            (fields::FAILED_AT, codec::encode_time(now)),
                            (fields::EXCEPTION_TYPE, failure.kind.clone()),
                            (fields::EXCEPTION_MESSAGE, failure.message.clone()),
                            (fields::EXCEPTION_DETAILS, failure.details.clone()),
                        ],
                    )
                    .zadd(self.keys.failed(), id.as_str(), score(now));
                StatKind::Failed
            }
        };

        let daily = self.keys.stats_daily(kind, now.date_naive());
        let hourly = self.keys.stats_hourly(kind, now);
        batch
            .incr(self.keys.stats_total(kind))
            .incr(&daily)
            .expire(&daily, self.config.daily_stats_ttl())
            .incr(&hourly)
            .expire(&hourly, self.config.hourly_stats_ttl());

        let recorded = session.commit(batch).await?;
        if recorded {
            debug!(job_id = %id, outcome = kind.as_str(), "Outcome recorded");
        } else {
            warn!(job_id = %id, "Lease changed while recording outcome");
        }
        Ok(recorded)
    }

    /// Move a failed job back to the tail of its queue.
    ///
    /// Failure fields and `EnqueuedAt` are kept on the record. Returns
    /// `false` when the job is not failed or its queue cannot be determined.
    pub async fn retry(&self, id: &JobId) -> StoreResult<bool> {
        let Some(queue) = self.resolve_queue(id).await? else {
            debug!(job_id = %id, "Cannot retry job without a known queue");
            return Ok(false);
        };

        let mut batch = Batch::new();
        batch
            .decr(self.keys.stats_total(StatKind::Failed))
            .zrem(self.keys.failed(), id.as_str())
            .sadd(self.keys.queues(), &queue)
            .rpush(self.keys.queue(&queue), id.as_str());

        let retried = self.commit_if_failed(id, batch).await?;
        if retried {
            debug!(job_id = %id, queue = %queue, "Failed job requeued");
        }
        Ok(retried)
    }

    /// Drop a failed job; its record expires after the retention window.
    pub async fn discard(&self, id: &JobId) -> StoreResult<bool> {
        let mut batch = Batch::new();
        batch
            .decr(self.keys.stats_total(StatKind::Failed))
            .zrem(self.keys.failed(), id.as_str())
            .expire(self.keys.job(id.as_str()), self.config.job_expiration());

        let discarded = self.commit_if_failed(id, batch).await?;
        if discarded {
            debug!(job_id = %id, "Failed job discarded");
        }
        Ok(discarded)
    }

    /// Explicit queue field first, then the type-name convention.
    async fn resolve_queue(&self, id: &JobId) -> StoreResult<Option<String>> {
        let values = self
            .get_selected(id, &[fields::QUEUE, fields::TYPE])
            .await?;
        let mut values = values.into_iter();
        let queue = values.next().flatten();
        let job_type = values.next().flatten();
        Ok(queue.or_else(|| {
            job_type
                .as_deref()
                .and_then(|t| self.convention.queue_for(t))
        }))
    }

    /// Commit `batch` while `id` is still in the failed set.
    async fn commit_if_failed(&self, id: &JobId, batch: Batch) -> StoreResult<bool> {
        let failed_key = self.keys.failed();
        for _ in 0..MAX_CONFLICTS {
            let mut session = self.store.watch(std::slice::from_ref(&failed_key)).await?;
            if session.zscore(&failed_key, id.as_str()).await?.is_none() {
                session.unwatch().await?;
                return Ok(false);
            }
            if session.commit(batch.clone()).await? {
                return Ok(true);
            }
        }
        warn!(job_id = %id, "Failed set kept changing, giving up");
        Ok(false)
    }
}

#[cfg(test)]
#[path = "outcome_tests.rs"]
mod tests;
