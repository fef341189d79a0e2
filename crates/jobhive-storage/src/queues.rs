//! Queue and schedule engine.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use jobhive_core::{Batch, JobFields, JobId, StoreResult, WatchSession, codec, fields};

use crate::storage::{JobStorage, merge_fields, score};

impl JobStorage {
    /// Schedule a job to be enqueued on `queue` once `at` has passed.
    pub async fn schedule(
        &self,
        id: &JobId,
        job: Option<&JobFields>,
        queue: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let job_key = self.keys.job(id.as_str());
        let mut batch = Batch::new();
        merge_fields(&mut batch, &job_key, job);
        batch
            .hset_many(
                &job_key,
                [
                    (fields::SCHEDULED_AT, codec::encode_time(self.now())),
                    (fields::SCHEDULED_QUEUE, queue.to_string()),
                    (fields::QUEUE, queue.to_string()),
                ],
            )
            .zadd(self.keys.schedule(), id.as_str(), score(at));
        self.store.exec(batch).await?;

        debug!(job_id = %id, queue, at = %at, "Scheduled job");
        Ok(())
    }

    /// Enqueue a job for immediate execution.
    pub async fn enqueue(&self, queue: &str, id: &JobId, job: Option<&JobFields>) -> StoreResult<()> {
        let job_key = self.keys.job(id.as_str());
        let mut batch = Batch::new();
        merge_fields(&mut batch, &job_key, job);
        batch
            .hset_many(
                &job_key,
                [
                    (fields::ENQUEUED_AT, codec::encode_time(self.now())),
                    (fields::QUEUE, queue.to_string()),
                ],
            )
            .sadd(self.keys.queues(), queue)
            .rpush(self.keys.queue(queue), id.as_str());
        self.store.exec(batch).await?;

        debug!(job_id = %id, queue, "Enqueued job");
        Ok(())
    }

    /// Promote the earliest scheduled job due at `now`.
    ///
    /// Returns `false` when nothing is due, when another server won the race
    /// for the entry, or when the entry was stale and got dropped.
    pub async fn promote_due(&self, now: DateTime<Utc>) -> StoreResult<bool> {
        let schedule_key = self.keys.schedule();
        let mut session = self.store.watch(std::slice::from_ref(&schedule_key)).await?;

        let due = session
            .zrange_by_score(&schedule_key, f64::NEG_INFINITY, score(now), Some(1))
            .await?;
        let Some(id) = due.into_iter().next() else {
            session.unwatch().await?;
            return Ok(false);
        };
        let id = JobId::from(id);

        let Some(queue) = self.scheduled_queue(session.as_mut(), &id).await? else {
            let mut batch = Batch::new();
            batch.zrem(&schedule_key, id.as_str());
            if session.commit(batch).await? {
                warn!(job_id = %id, "Dropped scheduled entry without a target queue");
            }
            return Ok(false);
        };

        self.commit_promotion(session, &id, &queue).await
    }

    /// Promote one scheduled job regardless of its due time.
    ///
    /// Returns `false` when the job has no target queue, is no longer
    /// scheduled, or a concurrent change to the schedule aborted the move.
    pub async fn promote_by_id(&self, id: &JobId) -> StoreResult<bool> {
        let job_key = self.keys.job(id.as_str());
        let values = self
            .store
            .hmget(&job_key, &[fields::SCHEDULED_QUEUE, fields::QUEUE])
            .await?;
        let Some(queue) = values.into_iter().flatten().next() else {
            debug!(job_id = %id, "No target queue recorded, skipping promotion");
            return Ok(false);
        };

        let schedule_key = self.keys.schedule();
        let mut session = self.store.watch(std::slice::from_ref(&schedule_key)).await?;
        if session.zscore(&schedule_key, id.as_str()).await?.is_none() {
            session.unwatch().await?;
            return Ok(false);
        }

        self.commit_promotion(session, id, &queue).await
    }

    /// Block up to `timeout` for a job on `queue`, moving it onto the
    /// server's processing list in the same step.
    pub async fn dequeue(
        &self,
        server: &str,
        queue: &str,
        timeout: Duration,
    ) -> StoreResult<Option<JobId>> {
        let id = self
            .store
            .blocking_move_item(
                &self.keys.queue(queue),
                &self.keys.processing_list(server, queue),
                timeout,
            )
            .await?;
        if let Some(id) = &id {
            debug!(job_id = %id, server, queue, "Dequeued job");
        }
        Ok(id.map(JobId::from))
    }

    async fn scheduled_queue(
        &self,
        session: &mut dyn WatchSession,
        id: &JobId,
    ) -> StoreResult<Option<String>> {
        let job_key = self.keys.job(id.as_str());
        if let Some(queue) = session.hget(&job_key, fields::SCHEDULED_QUEUE).await? {
            return Ok(Some(queue));
        }
        session.hget(&job_key, fields::QUEUE).await
    }

    async fn commit_promotion(
        &self,
        mut session: Box<dyn WatchSession>,
        id: &JobId,
        queue: &str,
    ) -> StoreResult<bool> {
        let mut batch = Batch::new();
        batch
            .zrem(self.keys.schedule(), id.as_str())
            .hsetnx(
                self.keys.job(id.as_str()),
                fields::ENQUEUED_AT,
                codec::encode_time(self.now()),
            )
            .sadd(self.keys.queues(), queue)
            .rpush(self.keys.queue(queue), id.as_str());

        let promoted = session.commit(batch).await?;
        if promoted {
            debug!(job_id = %id, queue, "Promoted scheduled job");
        } else {
            debug!(job_id = %id, "Schedule changed during promotion");
        }
        Ok(promoted)
    }
}

#[cfg(test)]
#[path = "queues_tests.rs"]
mod tests;
