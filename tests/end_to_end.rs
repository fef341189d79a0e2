//! End-to-end lifecycle over the in-memory store.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::TimeZone;

use jobhive::{
    ArgsBuilder, JobArgs, JobClient, JobFailure, JobId, JobInvocation, JobOutcome, JobPerformer,
    JobServer, JobStorage, ManualClock, MemoryStore, PerformError, PerformerRegistry, RetryConfig,
    ServerConfig, StorageConfig,
};

fn storage_at(clock: Arc<ManualClock>) -> JobStorage {
    JobStorage::new(Arc::new(MemoryStore::new()), StorageConfig::default()).with_clock(clock)
}

#[tokio::test]
async fn test_schedule_promote_fail_retry() {
    let t0 = chrono::Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
    let clock = Arc::new(ManualClock::new(t0 - chrono::Duration::minutes(10)));
    let storage = storage_at(clock.clone());
    let client = JobClient::new(storage.clone());

    let args = ArgsBuilder::new().arg("report", "monthly").unwrap().build();
    let j1 = client.schedule("queueA", "build_report", &args, t0).await.unwrap();
    assert_eq!(storage.scheduled_count().await.unwrap(), 1);

    // Not yet due.
    assert!(!storage.promote_due(storage.now()).await.unwrap());

    clock.set(t0 + chrono::Duration::seconds(1));
    assert!(storage.promote_due(storage.now()).await.unwrap());
    assert_eq!(storage.queue_job_ids("queueA").await.unwrap(), vec![j1.clone()]);
    assert_eq!(storage.scheduled_count().await.unwrap(), 0);
    assert_eq!(storage.enqueued_count_in("queueA").await.unwrap(), 1);

    let claimed = storage
        .dequeue("S1", "queueA", Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(claimed, Some(j1.clone()));
    storage.begin_processing("S1", "queueA", &j1).await.unwrap();
    assert_eq!(storage.processing_list("S1", "queueA").await.unwrap(), vec![j1.clone()]);
    assert_eq!(storage.processing_count().await.unwrap(), 1);

    let failure = JobFailure::new("Timeout", "report service did not answer");
    assert!(storage.end_processing(&j1, &JobOutcome::Failed(failure)).await.unwrap());
    storage.remove_from_processing_list("S1", "queueA", &j1).await.unwrap();
    assert_eq!(storage.processing_count().await.unwrap(), 0);
    assert_eq!(storage.failed_count().await.unwrap(), 1);
    let failed = storage.failed_jobs().await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].0, j1);

    assert!(storage.retry(&j1).await.unwrap());
    assert_eq!(storage.failed_count().await.unwrap(), 0);
    assert_eq!(storage.queue_job_ids("queueA").await.unwrap(), vec![j1.clone()]);

    let details = storage.job_details(&j1).await.unwrap().unwrap();
    assert_eq!(details.job_type.as_deref(), Some("build_report"));
    assert_eq!(details.arguments, args);
    assert!(details.properties.contains_key("ExceptionType"));
}

#[tokio::test]
async fn test_duplicate_outcome_is_detectable() {
    let clock = Arc::new(ManualClock::new(
        chrono::Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap(),
    ));
    let storage = storage_at(clock);
    let id = JobId::from("dup");
    storage.enqueue("default", &id, None).await.unwrap();
    storage
        .dequeue("S1", "default", Duration::from_secs(1))
        .await
        .unwrap();
    storage.begin_processing("S1", "default", &id).await.unwrap();

    assert!(storage.end_processing(&id, &JobOutcome::Succeeded).await.unwrap());
    assert!(!storage.end_processing(&id, &JobOutcome::Succeeded).await.unwrap());

    let stats = storage.statistics().await.unwrap();
    assert_eq!(stats.succeeded, 1);
    assert_eq!(stats.processing, 0);
    let today = storage.succeeded_by_dates().await.unwrap();
    assert_eq!(today[0].count, 1);
}

struct Tally(AtomicUsize);

#[async_trait]
impl JobPerformer for Tally {
    async fn perform(&self, job: &JobInvocation) -> Result<(), PerformError> {
        let n: u64 = job.arg("n")?;
        if n % 2 == 1 {
            return Err(PerformError::Failed(format!("odd input {n}")));
        }
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_server_runs_jobs_and_retry_completes_them() {
    let storage = JobStorage::new(Arc::new(MemoryStore::new()), StorageConfig::default());
    let client = JobClient::new(storage.clone());
    let tally = Arc::new(Tally(AtomicUsize::new(0)));
    let mut registry = PerformerRegistry::new();
    registry.register("tally", tally.clone());

    let config = ServerConfig {
        name: Some("e2e".to_string()),
        queue: "numbers".to_string(),
        concurrency: 3,
        poll_interval_ms: 50,
        dequeue_timeout_secs: 1,
        shutdown_timeout_secs: 5,
    };
    let mut server = JobServer::new(storage.clone(), registry, &config, &RetryConfig::default()).unwrap();

    for n in 0..6u64 {
        let args = ArgsBuilder::new().arg("n", &n).unwrap().build();
        client.enqueue("numbers", "tally", &args).await.unwrap();
    }
    client
        .enqueue("numbers", "tally", &JobArgs::new())
        .await
        .unwrap();

    server.start().await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let stats = storage.statistics().await.unwrap();
            if stats.succeeded + stats.failed == 7 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("jobs did not finish in time");
    server.stop().await.unwrap();

    let stats = storage.statistics().await.unwrap();
    assert_eq!(stats.succeeded, 3);
    assert_eq!(stats.failed, 4);
    assert_eq!(stats.processing, 0);
    assert_eq!(stats.servers, 0);
    assert_eq!(tally.0.load(Ordering::SeqCst), 3);

    let failed = storage.failed_jobs().await.unwrap();
    let kinds: Vec<String> = failed
        .iter()
        .filter_map(|(_, job)| job.as_ref()?.exception_type.clone())
        .collect();
    assert_eq!(kinds.iter().filter(|k| *k == "Failed").count(), 3);
    assert_eq!(kinds.iter().filter(|k| *k == "MissingArgument").count(), 1);

    for (id, _) in &failed {
        assert!(storage.retry(id).await.unwrap());
    }
    assert_eq!(storage.failed_count().await.unwrap(), 0);
    assert_eq!(storage.enqueued_count_in("numbers").await.unwrap(), 4);
}
