//! Read-side queries for dashboards and the admin CLI.
//!
//! Every call is a point-in-time snapshot; two calls in a row may observe
//! different states.

use std::collections::BTreeMap;

use chrono::{DateTime, DurationRound, NaiveDate, Utc};
use serde::Serialize;

use jobhive_core::{JobArgs, JobId, StatKind, StoreResult, codec, fields};

use crate::coordination::{SERVER_CONCURRENCY, SERVER_QUEUE, SERVER_STARTED_AT};
use crate::storage::JobStorage;

/// Global counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Statistics {
    pub servers: u64,
    pub queues: u64,
    pub scheduled: u64,
    pub enqueued: u64,
    pub processing: i64,
    pub succeeded: i64,
    pub failed: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessingJob {
    pub job_type: Option<String>,
    pub args: JobArgs,
    pub started_at: Option<DateTime<Utc>>,
    pub server_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduledJob {
    pub job_type: Option<String>,
    pub args: JobArgs,
    pub queue: Option<String>,
    pub enqueue_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerInfo {
    pub name: String,
    pub queue: String,
    pub concurrency: u32,
    pub started_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedJob {
    pub job_type: Option<String>,
    pub queue: Option<String>,
    pub args: JobArgs,
    pub failed_at: Option<DateTime<Utc>>,
    pub exception_type: Option<String>,
    pub exception_message: Option<String>,
    pub exception_details: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SucceededJob {
    pub job_type: Option<String>,
    pub queue: Option<String>,
    pub args: JobArgs,
    pub succeeded_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnqueuedJob {
    pub job_type: Option<String>,
    pub args: JobArgs,
    pub enqueued_at: Option<DateTime<Utc>>,
}

/// A queue with its length, bound servers and the jobs at its head.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueSummary {
    pub name: String,
    pub length: u64,
    pub servers: Vec<String>,
    pub first_jobs: Vec<(JobId, Option<EnqueuedJob>)>,
}

/// Type and arguments of a job plus every other stored field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobDetails {
    pub job_type: Option<String>,
    pub arguments: JobArgs,
    pub properties: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DailyCount {
    pub date: NaiveDate,
    pub count: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HourlyCount {
    pub hour: DateTime<Utc>,
    pub count: i64,
}

fn counter(raw: Option<String>) -> i64 {
    raw.and_then(|v| v.parse().ok()).unwrap_or(0)
}

/// Missing arguments read as empty; undecodable ones make the whole entry absent.
fn decode_args(raw: &Option<String>) -> Option<JobArgs> {
    match raw {
        Some(raw) => codec::decode(raw).ok(),
        None => Some(JobArgs::new()),
    }
}

fn decode_time(raw: &Option<String>) -> Option<DateTime<Utc>> {
    raw.as_deref().and_then(codec::decode_time)
}

impl JobStorage {
    pub async fn statistics(&self) -> StoreResult<Statistics> {
        let counters = self
            .store
            .mget(&[
                self.keys.stats_processing(),
                self.keys.stats_total(StatKind::Succeeded),
                self.keys.stats_total(StatKind::Failed),
            ])
            .await?;
        let mut counters = counters.into_iter().map(counter);

        Ok(Statistics {
            servers: self.store.scard(&self.keys.servers()).await?,
            queues: self.queues_count().await?,
            scheduled: self.scheduled_count().await?,
            enqueued: self.enqueued_count().await?,
            processing: counters.next().unwrap_or(0),
            succeeded: counters.next().unwrap_or(0),
            failed: counters.next().unwrap_or(0),
        })
    }

    pub async fn scheduled_count(&self) -> StoreResult<u64> {
        self.store.zcard(&self.keys.schedule()).await
    }

    /// Jobs waiting across every known queue.
    pub async fn enqueued_count(&self) -> StoreResult<u64> {
        let mut total = 0;
        for queue in self.store.smembers(&self.keys.queues()).await? {
            total += self.enqueued_count_in(&queue).await?;
        }
        Ok(total)
    }

    pub async fn enqueued_count_in(&self, queue: &str) -> StoreResult<u64> {
        self.store.llen(&self.keys.queue(queue)).await
    }

    pub async fn succeeded_count(&self) -> StoreResult<i64> {
        let raw = self.store.get(&self.keys.stats_total(StatKind::Succeeded)).await?;
        Ok(counter(raw))
    }

    pub async fn failed_count(&self) -> StoreResult<i64> {
        let raw = self.store.get(&self.keys.stats_total(StatKind::Failed)).await?;
        Ok(counter(raw))
    }

    pub async fn processing_count(&self) -> StoreResult<i64> {
        let raw = self.store.get(&self.keys.stats_processing()).await?;
        Ok(counter(raw))
    }

    pub async fn queues_count(&self) -> StoreResult<u64> {
        self.store.scard(&self.keys.queues()).await
    }

    /// Jobs in flight, oldest start first.
    pub async fn processing_jobs(&self) -> StoreResult<Vec<(JobId, Option<ProcessingJob>)>> {
        let ids = self.store.smembers(&self.keys.processing_set()).await?;
        let mut jobs = self
            .get_many_with_selected(
                &ids,
                &[fields::TYPE, fields::ARGS, fields::STARTED_AT, fields::SERVER_NAME],
                |v| {
                    Some(ProcessingJob {
                        job_type: v[0].clone(),
                        args: decode_args(&v[1])?,
                        started_at: decode_time(&v[2]),
                        server_name: v[3].clone(),
                    })
                },
            )
            .await?;
        jobs.sort_by_key(|(_, job)| job.as_ref().and_then(|j| j.started_at));
        Ok(jobs)
    }

    /// Scheduled jobs, earliest first.
    pub async fn scheduled_jobs(&self) -> StoreResult<Vec<(JobId, Option<ScheduledJob>)>> {
        let entries = self
            .store
            .zrange_with_scores(&self.keys.schedule(), 0, -1)
            .await?;
        let mut result = Vec::with_capacity(entries.len());
        for (id, score) in entries {
            let job_id = JobId::from(id);
            let v = self
                .get_selected(
                    &job_id,
                    &[fields::TYPE, fields::ARGS, fields::SCHEDULED_QUEUE, fields::QUEUE],
                )
                .await?;
            let job = if v.iter().all(Option::is_none) {
                None
            } else {
                decode_args(&v[1]).map(|args| ScheduledJob {
                    queue: v[2]
                        .clone()
                        .or_else(|| self.display_queue(&v[3], &v[0])),
                    job_type: v[0].clone(),
                    args,
                    enqueue_at: DateTime::<Utc>::from_timestamp(score as i64, 0).unwrap_or_default(),
                })
            };
            result.push((job_id, job));
        }
        Ok(result)
    }

    /// Announced servers, by name.
    pub async fn servers(&self) -> StoreResult<Vec<ServerInfo>> {
        let mut names = self.store.smembers(&self.keys.servers()).await?;
        names.sort();
        let mut result = Vec::with_capacity(names.len());
        for name in names {
            let server = self.store.hgetall(&self.keys.server(&name)).await?;
            if server.is_empty() {
                continue;
            }
            result.push(ServerInfo {
                queue: server.get(SERVER_QUEUE).cloned().unwrap_or_default(),
                concurrency: server
                    .get(SERVER_CONCURRENCY)
                    .and_then(|c| c.parse().ok())
                    .unwrap_or(0),
                started_at: server
                    .get(SERVER_STARTED_AT)
                    .and_then(|raw| codec::decode_time(raw)),
                name,
            });
        }
        Ok(result)
    }

    /// Failed jobs, most recent failure first.
    pub async fn failed_jobs(&self) -> StoreResult<Vec<(JobId, Option<FailedJob>)>> {
        let entries = self
            .store
            .zrange_with_scores(&self.keys.failed(), 0, -1)
            .await?;
        let ids: Vec<String> = entries.into_iter().rev().map(|(id, _)| id).collect();
        self.get_many_with_selected(
            &ids,
            &[
                fields::TYPE,
                fields::ARGS,
                fields::FAILED_AT,
                fields::EXCEPTION_TYPE,
                fields::EXCEPTION_MESSAGE,
                fields::EXCEPTION_DETAILS,
                fields::QUEUE,
            ],
            |v| {
                Some(FailedJob {
                    queue: self.display_queue(&v[6], &v[0]),
                    job_type: v[0].clone(),
                    args: decode_args(&v[1])?,
                    failed_at: decode_time(&v[2]),
                    exception_type: v[3].clone(),
                    exception_message: v[4].clone(),
                    exception_details: v[5].clone(),
                })
            },
        )
        .await
    }

    /// Recently succeeded jobs, newest first.
    pub async fn succeeded_jobs(&self) -> StoreResult<Vec<(JobId, Option<SucceededJob>)>> {
        let ids = self.store.lrange(&self.keys.succeeded(), 0, -1).await?;
        self.get_many_with_selected(
            &ids,
            &[fields::TYPE, fields::ARGS, fields::SUCCEEDED_AT, fields::QUEUE],
            |v| {
                Some(SucceededJob {
                    queue: self.display_queue(&v[3], &v[0]),
                    job_type: v[0].clone(),
                    args: decode_args(&v[1])?,
                    succeeded_at: decode_time(&v[2]),
                })
            },
        )
        .await
    }

    /// Every known queue with a preview of its head.
    pub async fn queues(&self) -> StoreResult<Vec<QueueSummary>> {
        let mut names = self.store.smembers(&self.keys.queues()).await?;
        names.sort();
        let preview = self.config.queue_preview_size as isize;
        let mut result = Vec::with_capacity(names.len());
        for name in names {
            let queue_key = self.keys.queue(&name);
            let head = if preview > 0 {
                self.store.lrange(&queue_key, 0, preview - 1).await?
            } else {
                Vec::new()
            };
            let first_jobs = self
                .get_many_with_selected(
                    &head,
                    &[fields::TYPE, fields::ARGS, fields::ENQUEUED_AT],
                    |v| {
                        Some(EnqueuedJob {
                            job_type: v[0].clone(),
                            args: decode_args(&v[1])?,
                            enqueued_at: decode_time(&v[2]),
                        })
                    },
                )
                .await?;
            let mut servers = self.store.smembers(&self.keys.queue_servers(&name)).await?;
            servers.sort();
            result.push(QueueSummary {
                length: self.store.llen(&queue_key).await?,
                servers,
                first_jobs,
                name,
            });
        }
        Ok(result)
    }

    /// Full record of one job, `None` when it does not exist.
    pub async fn job_details(&self, id: &JobId) -> StoreResult<Option<JobDetails>> {
        let Some(mut record) = self.get_all(id).await? else {
            return Ok(None);
        };
        let job_type = record.remove(fields::TYPE);
        // Undecodable arguments stay visible as the raw `Args` property.
        let arguments = match record.get(fields::ARGS).map(|raw| codec::decode::<JobArgs>(raw)) {
            Some(Ok(arguments)) => {
                record.remove(fields::ARGS);
                arguments
            }
            Some(Err(_)) | None => JobArgs::new(),
        };
        Ok(Some(JobDetails {
            job_type,
            arguments,
            properties: record,
        }))
    }

    /// Daily succeeded counts, today first.
    pub async fn succeeded_by_dates(&self) -> StoreResult<Vec<DailyCount>> {
        self.daily_timeline(StatKind::Succeeded).await
    }

    /// Daily failed counts, today first.
    pub async fn failed_by_dates(&self) -> StoreResult<Vec<DailyCount>> {
        self.daily_timeline(StatKind::Failed).await
    }

    /// Hourly succeeded counts, current hour first.
    pub async fn hourly_succeeded(&self) -> StoreResult<Vec<HourlyCount>> {
        self.hourly_timeline(StatKind::Succeeded).await
    }

    /// Hourly failed counts, current hour first.
    pub async fn hourly_failed(&self) -> StoreResult<Vec<HourlyCount>> {
        self.hourly_timeline(StatKind::Failed).await
    }

    /// Jobs a server has claimed from a queue and not yet released.
    pub async fn processing_list(&self, server: &str, queue: &str) -> StoreResult<Vec<JobId>> {
        let ids = self
            .store
            .lrange(&self.keys.processing_list(server, queue), 0, -1)
            .await?;
        Ok(ids.into_iter().map(JobId::from).collect())
    }

    /// Every id waiting on a queue, head first.
    pub async fn queue_job_ids(&self, queue: &str) -> StoreResult<Vec<JobId>> {
        let ids = self.store.lrange(&self.keys.queue(queue), 0, -1).await?;
        Ok(ids.into_iter().map(JobId::from).collect())
    }

    fn display_queue(&self, queue: &Option<String>, job_type: &Option<String>) -> Option<String> {
        queue.clone().or_else(|| {
            job_type
                .as_deref()
                .and_then(|t| self.convention.queue_for(t))
        })
    }

    async fn daily_timeline(&self, kind: StatKind) -> StoreResult<Vec<DailyCount>> {
        let today = self.now().date_naive();
        let dates: Vec<NaiveDate> = (0..=i64::from(self.config.timeline_days))
            .map(|i| today - chrono::Duration::days(i))
            .collect();
        let keys: Vec<String> = dates
            .iter()
            .map(|date| self.keys.stats_daily(kind, *date))
            .collect();
        let values = self.store.mget(&keys).await?;

        Ok(dates
            .into_iter()
            .zip(values)
            .map(|(date, raw)| DailyCount {
                date,
                count: counter(raw),
            })
            .collect())
    }

    async fn hourly_timeline(&self, kind: StatKind) -> StoreResult<Vec<HourlyCount>> {
        let now = self.now();
        let current = now.duration_trunc(chrono::Duration::hours(1)).unwrap_or(now);
        let hours: Vec<DateTime<Utc>> = (0..self.config.timeline_hours)
            .map(|i| current - chrono::Duration::hours(i64::from(i)))
            .collect();
        let keys: Vec<String> = hours
            .iter()
            .map(|hour| self.keys.stats_hourly(kind, *hour))
            .collect();
        let values = self.store.mget(&keys).await?;

        Ok(hours
            .into_iter()
            .zip(values)
            .map(|(hour, raw)| HourlyCount {
                hour,
                count: counter(raw),
            })
            .collect())
    }
}

#[cfg(test)]
#[path = "monitoring_tests.rs"]
mod tests;
