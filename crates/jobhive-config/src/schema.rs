//! Configuration schema definitions.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub server: ServerConfig,
}

/// Storage engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Prefix applied to every store key.
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Connection string for the Redis backend.
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// How long a finished job record is kept (in seconds).
    #[serde(default = "default_retention")]
    pub job_expiration_secs: u64,

    /// Lifetime of a daily stats bucket (in seconds).
    #[serde(default = "default_retention")]
    pub daily_stats_ttl_secs: u64,

    /// Lifetime of an hourly stats bucket (in seconds).
    #[serde(default = "default_retention")]
    pub hourly_stats_ttl_secs: u64,

    /// Number of ids kept in the recent-succeeded list.
    #[serde(default = "default_succeeded_list_size")]
    pub succeeded_list_size: usize,

    /// Number of head-of-queue jobs shown per queue.
    #[serde(default = "default_queue_preview_size")]
    pub queue_preview_size: usize,

    /// Days covered by the daily timeline, not counting today.
    #[serde(default = "default_timeline_days")]
    pub timeline_days: u32,

    /// Hours covered by the hourly timeline.
    #[serde(default = "default_timeline_hours")]
    pub timeline_hours: u32,
}

impl StorageConfig {
    pub fn job_expiration(&self) -> Duration {
        Duration::from_secs(self.job_expiration_secs)
    }

    pub fn daily_stats_ttl(&self) -> Duration {
        Duration::from_secs(self.daily_stats_ttl_secs)
    }

    pub fn hourly_stats_ttl(&self) -> Duration {
        Duration::from_secs(self.hourly_stats_ttl_secs)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            redis_url: default_redis_url(),
            job_expiration_secs: default_retention(),
            daily_stats_ttl_secs: default_retention(),
            hourly_stats_ttl_secs: default_retention(),
            succeeded_list_size: default_succeeded_list_size(),
            queue_preview_size: default_queue_preview_size(),
            timeline_days: default_timeline_days(),
            timeline_hours: default_timeline_hours(),
        }
    }
}

fn default_namespace() -> String {
    "jobhive".to_string()
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379/0".to_string()
}

fn default_retention() -> u64 {
    86_400 // 1 day
}

fn default_succeeded_list_size() -> usize {
    100
}

fn default_queue_preview_size() -> usize {
    5
}

fn default_timeline_days() -> u32 {
    7
}

fn default_timeline_hours() -> u32 {
    24
}

/// Backoff policy for transient store failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Delay before the first retry (in milliseconds).
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Upper bound for a single delay (in milliseconds).
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    /// Growth factor applied after every failed attempt.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Give up after this many attempts (unset = never).
    #[serde(default)]
    pub max_attempts: Option<u32>,

    /// Give up once this much time has passed (unset = never).
    #[serde(default)]
    pub max_elapsed_secs: Option<u64>,
}

impl RetryConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn max_elapsed(&self) -> Option<Duration> {
        self.max_elapsed_secs.map(Duration::from_secs)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            multiplier: default_multiplier(),
            max_attempts: None,
            max_elapsed_secs: None,
        }
    }
}

fn default_initial_backoff() -> u64 {
    50
}

fn default_max_backoff() -> u64 {
    5_000
}

fn default_multiplier() -> f64 {
    2.0
}

/// Job server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server name; generated at startup when unset.
    #[serde(default)]
    pub name: Option<String>,

    /// Queue this server consumes.
    #[serde(default = "default_queue")]
    pub queue: String,

    /// Maximum number of jobs executed at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,

    /// Schedule polling interval (in milliseconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// How long a worker blocks waiting for a job (in seconds).
    #[serde(default = "default_dequeue_timeout")]
    pub dequeue_timeout_secs: u64,

    /// Graceful shutdown timeout (in seconds).
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

impl ServerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn dequeue_timeout(&self) -> Duration {
        Duration::from_secs(self.dequeue_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: None,
            queue: default_queue(),
            concurrency: default_concurrency(),
            poll_interval_ms: default_poll_interval(),
            dequeue_timeout_secs: default_dequeue_timeout(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

fn default_queue() -> String {
    "default".to_string()
}

fn default_concurrency() -> u32 {
    4
}

fn default_poll_interval() -> u64 {
    1_000
}

fn default_dequeue_timeout() -> u64 {
    5
}

fn default_shutdown_timeout() -> u64 {
    30
}

#[cfg(test)]
#[path = "schema_tests.rs"]
mod tests;
