use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use async_trait::async_trait;
use jobhive_config::StorageConfig;
use jobhive_core::{Batch, JobArgs, MemoryStore, Store, WatchSession};
use jobhive_storage::JobClient;

use super::*;
use crate::error::PerformError;
use crate::performer::{JobInvocation, JobPerformer};

#[derive(Default)]
struct Counter {
    runs: AtomicUsize,
}

#[async_trait]
impl JobPerformer for Counter {
    async fn perform(&self, _job: &JobInvocation) -> Result<(), PerformError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn server_config(name: Option<&str>) -> ServerConfig {
    ServerConfig {
        name: name.map(str::to_string),
        queue: "mail".to_string(),
        concurrency: 2,
        poll_interval_ms: 50,
        dequeue_timeout_secs: 1,
        shutdown_timeout_secs: 5,
    }
}

fn setup(name: Option<&str>) -> (JobServer, JobStorage, Arc<Counter>) {
    let storage = JobStorage::new(Arc::new(MemoryStore::new()), StorageConfig::default());
    let counter = Arc::new(Counter::default());
    let mut registry = PerformerRegistry::new();
    registry.register("count", counter.clone());
    let server = JobServer::new(
        storage.clone(),
        registry,
        &server_config(name),
        &RetryConfig::default(),
    )
    .unwrap();
    (server, storage, counter)
}

async fn wait_for_runs(counter: &Counter, expected: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while counter.runs.load(Ordering::SeqCst) < expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("jobs did not run in time");
}

#[test]
fn test_rejects_zero_concurrency() {
    let storage = JobStorage::new(Arc::new(MemoryStore::new()), StorageConfig::default());
    let mut config = server_config(None);
    config.concurrency = 0;
    let result = JobServer::new(storage, PerformerRegistry::new(), &config, &RetryConfig::default());
    assert!(matches!(result, Err(ServerError::InvalidConfig(_))));
}

#[test]
fn test_generates_name_when_unset() {
    let (a, _, _) = setup(None);
    let (b, _, _) = setup(None);
    assert!(a.name().starts_with("server-"));
    assert_ne!(a.name(), b.name());

    let (named, _, _) = setup(Some("worker-1"));
    assert_eq!(named.name(), "worker-1");
    assert_eq!(named.queue(), "mail");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_runs_enqueued_and_scheduled_jobs() {
    let (mut server, storage, counter) = setup(Some("s1"));
    let client = JobClient::new(storage.clone());
    for _ in 0..3 {
        client.enqueue("mail", "count", &JobArgs::new()).await.unwrap();
    }
    client
        .schedule_in("mail", "count", &JobArgs::new(), chrono::Duration::seconds(-1))
        .await
        .unwrap();

    server.start().await.unwrap();
    assert!(server.is_running());
    let servers = storage.servers().await.unwrap();
    assert_eq!(servers.len(), 1);
    assert_eq!(servers[0].concurrency, 2);

    wait_for_runs(&counter, 4).await;
    server.stop().await.unwrap();

    assert!(!server.is_running());
    assert!(storage.servers().await.unwrap().is_empty());
    assert_eq!(server.stats().succeeded(), 4);
    assert_eq!(storage.succeeded_count().await.unwrap(), 4);
    assert_eq!(storage.scheduled_count().await.unwrap(), 0);
    assert_eq!(storage.processing_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_start_and_stop_guards() {
    let (mut server, _, _) = setup(Some("s1"));
    assert!(matches!(server.stop().await, Err(ServerError::NotRunning)));

    server.start().await.unwrap();
    assert!(matches!(server.start().await, Err(ServerError::AlreadyRunning)));
    server.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_start_recovers_jobs_left_by_previous_run() {
    let (mut server, storage, counter) = setup(Some("s1"));
    let client = JobClient::new(storage.clone());
    let id = client.enqueue("mail", "count", &JobArgs::new()).await.unwrap();

    // A previous run claimed the job and died.
    let claimed = storage
        .dequeue("s1", "mail", Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(claimed, Some(id.clone()));
    storage.begin_processing("s1", "mail", &id).await.unwrap();

    server.start().await.unwrap();
    wait_for_runs(&counter, 1).await;
    server.stop().await.unwrap();

    assert_eq!(storage.succeeded_count().await.unwrap(), 1);
    assert_eq!(storage.processing_count().await.unwrap(), 0);
    assert!(storage.processing_list("s1", "mail").await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_corrupt_store_halts_server() {
    let (mut server, storage, _) = setup(Some("s1"));
    server.start().await.unwrap();
    storage
        .store()
        .hset(&storage.keys().queue("mail"), "not", "a list")
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while !server.is_halted() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("server kept running on a corrupt store");

    let err = server.stop().await.unwrap_err();
    assert!(matches!(err, ServerError::Halted(StoreError::Malformed(_))));
    assert!(!server.is_running());
    assert!(storage.servers().await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_run_until_returns_when_halted() {
    let (server, storage, _) = setup(Some("s1"));
    storage
        .store()
        .hset(&storage.keys().schedule(), "not", "a sorted set")
        .await
        .unwrap();

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        server.run_until(std::future::pending()),
    )
    .await
    .expect("run_until did not notice the halt");

    assert!(matches!(result, Err(ServerError::Halted(_))));
    assert!(storage.servers().await.unwrap().is_empty());
}

/// Drops the connection on the next `fail_execs` batch writes.
struct FlakyStore {
    inner: MemoryStore,
    fail_execs: AtomicU32,
}

#[async_trait]
impl Store for FlakyStore {
    async fn exec(&self, batch: Batch) -> StoreResult<()> {
        let remaining = self.fail_execs.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_execs.store(remaining - 1, Ordering::SeqCst);
            return Err(StoreError::Connection("connection reset".into()));
        }
        self.inner.exec(batch).await
    }
    async fn watch(&self, keys: &[String]) -> StoreResult<Box<dyn WatchSession>> {
        self.inner.watch(keys).await
    }
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.inner.get(key).await
    }
    async fn mget(&self, keys: &[String]) -> StoreResult<Vec<Option<String>>> {
        self.inner.mget(keys).await
    }
    async fn hget(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
        self.inner.hget(key, field).await
    }
    async fn hmget(&self, key: &str, fields: &[&str]) -> StoreResult<Vec<Option<String>>> {
        self.inner.hmget(key, fields).await
    }
    async fn hgetall(&self, key: &str) -> StoreResult<BTreeMap<String, String>> {
        self.inner.hgetall(key).await
    }
    async fn smembers(&self, key: &str) -> StoreResult<Vec<String>> {
        self.inner.smembers(key).await
    }
    async fn scard(&self, key: &str) -> StoreResult<u64> {
        self.inner.scard(key).await
    }
    async fn llen(&self, key: &str) -> StoreResult<u64> {
        self.inner.llen(key).await
    }
    async fn lrange(&self, key: &str, start: isize, stop: isize) -> StoreResult<Vec<String>> {
        self.inner.lrange(key, start, stop).await
    }
    async fn zcard(&self, key: &str) -> StoreResult<u64> {
        self.inner.zcard(key).await
    }
    async fn zscore(&self, key: &str, member: &str) -> StoreResult<Option<f64>> {
        self.inner.zscore(key, member).await
    }
    async fn zrange_with_scores(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> StoreResult<Vec<(String, f64)>> {
        self.inner.zrange_with_scores(key, start, stop).await
    }
    async fn zrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: Option<usize>,
    ) -> StoreResult<Vec<String>> {
        self.inner.zrange_by_score(key, min, max, limit).await
    }
    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        self.inner.ttl(key).await
    }
    async fn hset(&self, key: &str, field: &str, value: &str) -> StoreResult<()> {
        self.inner.hset(key, field, value).await
    }
    async fn lrem(&self, key: &str, count: isize, value: &str) -> StoreResult<u64> {
        self.inner.lrem(key, count, value).await
    }
    async fn move_item(&self, source: &str, destination: &str) -> StoreResult<Option<String>> {
        self.inner.move_item(source, destination).await
    }
    async fn blocking_move_item(
        &self,
        source: &str,
        destination: &str,
        timeout: Duration,
    ) -> StoreResult<Option<String>> {
        self.inner.blocking_move_item(source, destination, timeout).await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_lifecycle_survives_dropped_connections() {
    let flaky = Arc::new(FlakyStore {
        inner: MemoryStore::new(),
        fail_execs: AtomicU32::new(2),
    });
    let storage = JobStorage::new(flaky.clone(), StorageConfig::default());
    let retry = RetryConfig {
        initial_backoff_ms: 10,
        max_backoff_ms: 20,
        ..RetryConfig::default()
    };
    let mut server = JobServer::new(
        storage.clone(),
        PerformerRegistry::new(),
        &server_config(Some("s1")),
        &retry,
    )
    .unwrap();

    server.start().await.unwrap();
    assert_eq!(storage.servers().await.unwrap().len(), 1);

    flaky.fail_execs.store(2, Ordering::SeqCst);
    server.stop().await.unwrap();
    assert!(storage.servers().await.unwrap().is_empty());
}
