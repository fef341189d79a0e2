use std::time::Duration;

use super::*;
use crate::storage::testing;
use jobhive_core::{Batch, JobFailure, JobFields, JobOutcome, Store};

fn job(job_type: &str, args: &str) -> JobFields {
    let mut job = JobFields::new();
    job.insert(fields::TYPE.to_string(), job_type.to_string());
    job.insert(fields::ARGS.to_string(), args.to_string());
    job
}

async fn run(storage: &JobStorage, server: &str, queue: &str) -> JobId {
    let id = storage
        .dequeue(server, queue, Duration::from_secs(1))
        .await
        .unwrap()
        .unwrap();
    storage.begin_processing(server, queue, &id).await.unwrap();
    id
}

#[tokio::test]
async fn test_statistics_snapshot() {
    let (storage, _, _) = testing::storage();
    storage.announce("s1", 4, "mail").await.unwrap();
    for id in ["1", "2", "3"] {
        storage
            .enqueue("mail", &JobId::from(id), Some(&job("send", "{}")))
            .await
            .unwrap();
    }
    storage
        .enqueue("images", &JobId::from("4"), Some(&job("resize", "{}")))
        .await
        .unwrap();
    storage
        .schedule(
            &JobId::from("5"),
            Some(&job("report", "{}")),
            "reports",
            testing::start() + chrono::Duration::hours(1),
        )
        .await
        .unwrap();

    let ok = run(&storage, "s1", "mail").await;
    storage.end_processing(&ok, &JobOutcome::Succeeded).await.unwrap();
    let bad = run(&storage, "s1", "mail").await;
    storage
        .end_processing(&bad, &JobOutcome::Failed(JobFailure::new("E", "x")))
        .await
        .unwrap();
    run(&storage, "s1", "images").await;

    let stats = storage.statistics().await.unwrap();
    assert_eq!(
        stats,
        Statistics {
            servers: 1,
            queues: 2,
            scheduled: 1,
            enqueued: 1,
            processing: 1,
            succeeded: 1,
            failed: 1,
        }
    );
}

#[tokio::test]
async fn test_empty_statistics() {
    let (storage, _, _) = testing::storage();
    let stats = storage.statistics().await.unwrap();
    assert_eq!(stats.servers, 0);
    assert_eq!(stats.enqueued, 0);
    assert_eq!(stats.succeeded, 0);
    assert!(storage.processing_jobs().await.unwrap().is_empty());
    assert!(storage.failed_jobs().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_processing_jobs_sorted_by_start() {
    let (storage, _, clock) = testing::storage();
    for id in ["a", "b"] {
        storage
            .enqueue("default", &JobId::from(id), Some(&job("work", r#"{"n":"1"}"#)))
            .await
            .unwrap();
    }
    clock.advance(chrono::Duration::minutes(1));
    let first = run(&storage, "s1", "default").await;
    clock.advance(chrono::Duration::minutes(1));
    run(&storage, "s2", "default").await;

    let jobs = storage.processing_jobs().await.unwrap();
    assert_eq!(jobs.len(), 2);
    assert_eq!(jobs[0].0, first);
    let detail = jobs[0].1.as_ref().unwrap();
    assert_eq!(detail.job_type.as_deref(), Some("work"));
    assert_eq!(detail.args.get("n").map(String::as_str), Some("1"));
    assert_eq!(detail.server_name.as_deref(), Some("s1"));
    assert_eq!(
        detail.started_at,
        Some(testing::start() + chrono::Duration::minutes(1))
    );
}

#[tokio::test]
async fn test_scheduled_jobs_use_score_as_time() {
    let (storage, store, _) = testing::storage();
    let at = testing::start() + chrono::Duration::minutes(30);
    storage
        .schedule(&JobId::from("1"), Some(&job("report", "{}")), "reports", at)
        .await
        .unwrap();
    let mut batch = Batch::new();
    batch.zadd(storage.keys().schedule(), "gone", 5.0);
    store.exec(batch).await.unwrap();

    let jobs = storage.scheduled_jobs().await.unwrap();
    assert_eq!(jobs.len(), 2);
    assert_eq!(jobs[0], (JobId::from("gone"), None));
    let scheduled = jobs[1].1.as_ref().unwrap();
    assert_eq!(scheduled.enqueue_at, at);
    assert_eq!(scheduled.queue.as_deref(), Some("reports"));
    assert_eq!(scheduled.job_type.as_deref(), Some("report"));
}

#[tokio::test]
async fn test_failed_jobs_newest_first() {
    let (storage, _, clock) = testing::storage();
    for id in ["old", "new"] {
        storage
            .enqueue("mail", &JobId::from(id), Some(&job("send", "{}")))
            .await
            .unwrap();
    }
    for _ in 0..2 {
        let id = run(&storage, "s1", "mail").await;
        let failure = JobFailure::new("Timeout", format!("{id} timed out")).with_details("trace");
        storage
            .end_processing(&id, &JobOutcome::Failed(failure))
            .await
            .unwrap();
        clock.advance(chrono::Duration::seconds(10));
    }

    let jobs = storage.failed_jobs().await.unwrap();
    let ids: Vec<&str> = jobs.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(ids, vec!["new", "old"]);

    let newest = jobs[0].1.as_ref().unwrap();
    assert_eq!(newest.queue.as_deref(), Some("mail"));
    assert_eq!(newest.exception_type.as_deref(), Some("Timeout"));
    assert_eq!(newest.exception_message.as_deref(), Some("new timed out"));
    assert_eq!(newest.exception_details.as_deref(), Some("trace"));
    assert_eq!(
        newest.failed_at,
        Some(testing::start() + chrono::Duration::seconds(10))
    );
}

#[tokio::test]
async fn test_succeeded_jobs_derive_queue_from_type() {
    let (storage, _, _) = testing::storage();
    let id = JobId::from("1");
    storage
        .set_properties(&id, &job("thumbnail@images", "{}"))
        .await
        .unwrap();
    let mut batch = Batch::new();
    batch.lpush(storage.keys().succeeded(), "1");
    storage.store().exec(batch).await.unwrap();

    let jobs = storage.succeeded_jobs().await.unwrap();
    assert_eq!(jobs.len(), 1);
    let succeeded = jobs[0].1.as_ref().unwrap();
    assert_eq!(succeeded.queue.as_deref(), Some("images"));
    assert_eq!(succeeded.succeeded_at, None);
}

#[tokio::test]
async fn test_undecodable_args_hide_entry() {
    let (storage, _, _) = testing::storage();
    storage
        .enqueue("default", &JobId::from("1"), Some(&job("work", "not json")))
        .await
        .unwrap();
    run(&storage, "s1", "default").await;

    let jobs = storage.processing_jobs().await.unwrap();
    assert_eq!(jobs, vec![(JobId::from("1"), None)]);
}

#[tokio::test]
async fn test_queue_summaries_preview_head() {
    let (storage, _, _) = testing::storage();
    storage.announce("s1", 1, "mail").await.unwrap();
    for i in 0..7 {
        storage
            .enqueue("mail", &JobId::from(format!("m{i}")), Some(&job("send", "{}")))
            .await
            .unwrap();
    }
    storage.enqueue("audit", &JobId::from("a0"), None).await.unwrap();

    let queues = storage.queues().await.unwrap();
    let names: Vec<&str> = queues.iter().map(|q| q.name.as_str()).collect();
    assert_eq!(names, vec!["audit", "mail"]);

    let mail = &queues[1];
    assert_eq!(mail.length, 7);
    assert_eq!(mail.servers, vec!["s1".to_string()]);
    assert_eq!(mail.first_jobs.len(), storage.config().queue_preview_size);
    assert_eq!(mail.first_jobs[0].0, JobId::from("m0"));
    let head = mail.first_jobs[0].1.as_ref().unwrap();
    assert_eq!(head.job_type.as_deref(), Some("send"));
    assert_eq!(head.enqueued_at, Some(testing::start()));

    let audit = &queues[0];
    assert!(audit.servers.is_empty());
    assert_eq!(audit.first_jobs.len(), 1);
}

#[tokio::test]
async fn test_job_details_split_type_and_args() {
    let (storage, _, _) = testing::storage();
    let id = JobId::from("1");
    storage
        .enqueue("mail", &id, Some(&job("send", r#"{"to":"\"a@b.c\""}"#)))
        .await
        .unwrap();

    let details = storage.job_details(&id).await.unwrap().unwrap();
    assert_eq!(details.job_type.as_deref(), Some("send"));
    assert_eq!(details.arguments.get("to").map(String::as_str), Some("\"a@b.c\""));
    assert!(!details.properties.contains_key(fields::TYPE));
    assert!(!details.properties.contains_key(fields::ARGS));
    assert_eq!(
        details.properties.get(fields::QUEUE).map(String::as_str),
        Some("mail")
    );
    assert!(details.properties.contains_key(fields::ENQUEUED_AT));

    assert!(storage.job_details(&JobId::from("nope")).await.unwrap().is_none());
}

#[tokio::test]
async fn test_job_details_keeps_undecodable_args_raw() {
    let (storage, _, _) = testing::storage();
    let id = JobId::from("1");
    storage
        .enqueue("mail", &id, Some(&job("send", "not json")))
        .await
        .unwrap();

    let details = storage.job_details(&id).await.unwrap().unwrap();
    assert_eq!(details.job_type.as_deref(), Some("send"));
    assert!(details.arguments.is_empty());
    assert_eq!(
        details.properties.get(fields::ARGS).map(String::as_str),
        Some("not json")
    );
    assert_eq!(storage.queues().await.unwrap()[0].first_jobs[0].1, None);
}

#[tokio::test]
async fn test_daily_timeline_covers_week() {
    let (storage, store, _) = testing::storage();
    let today = testing::start().date_naive();
    let yesterday = today - chrono::Duration::days(1);
    let mut batch = Batch::new();
    batch
        .incr(storage.keys().stats_daily(StatKind::Succeeded, today))
        .incr(storage.keys().stats_daily(StatKind::Succeeded, today))
        .incr(storage.keys().stats_daily(StatKind::Succeeded, yesterday))
        .incr(storage.keys().stats_daily(StatKind::Failed, today));
    store.exec(batch).await.unwrap();

    let succeeded = storage.succeeded_by_dates().await.unwrap();
    assert_eq!(succeeded.len(), 8);
    assert_eq!(succeeded[0], DailyCount { date: today, count: 2 });
    assert_eq!(succeeded[1], DailyCount { date: yesterday, count: 1 });
    assert_eq!(succeeded[7].date, today - chrono::Duration::days(7));
    assert!(succeeded[2..].iter().all(|d| d.count == 0));

    let failed = storage.failed_by_dates().await.unwrap();
    assert_eq!(failed[0].count, 1);
    assert_eq!(failed[1].count, 0);
}

#[tokio::test]
async fn test_hourly_timeline_covers_day() {
    let (storage, store, _) = testing::storage();
    let now = testing::start();
    let mut batch = Batch::new();
    batch
        .incr(storage.keys().stats_hourly(StatKind::Failed, now))
        .incr(storage.keys().stats_hourly(StatKind::Failed, now - chrono::Duration::hours(3)));
    store.exec(batch).await.unwrap();

    let failed = storage.hourly_failed().await.unwrap();
    assert_eq!(failed.len(), 24);
    assert_eq!(
        failed[0].hour,
        now - chrono::Duration::minutes(30),
        "hours are truncated"
    );
    assert_eq!(failed[0].count, 1);
    assert_eq!(failed[3].count, 1);
    assert_eq!(failed.iter().map(|h| h.count).sum::<i64>(), 2);

    let succeeded = storage.hourly_succeeded().await.unwrap();
    assert!(succeeded.iter().all(|h| h.count == 0));
}
