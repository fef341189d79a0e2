//! # jobhive
//!
//! Distributed background jobs over a shared key-value store.
//!
//! Producers create jobs with [`JobClient`], servers run them with
//! [`JobServer`], and dashboards read [`JobStorage`] snapshots. Any number
//! of processes may share one store.

pub use jobhive_config::{
    Config, ConfigError, ConfigLoader, ConfigValidator, RetryConfig, ServerConfig, StorageConfig,
};
#[cfg(feature = "redis")]
pub use jobhive_core::RedisStore;
pub use jobhive_core::{
    Clock, JobArgs, JobFailure, JobFields, JobId, JobOutcome, Keys, ManualClock, MemoryStore,
    QueueConvention, Resilience, Store, StoreError, StoreResult, SuffixConvention, SystemClock,
};
pub use jobhive_server::{
    JobInvocation, JobPerformer, JobServer, PerformError, PerformerRegistry, ServerError,
};
pub use jobhive_storage::{ArgsBuilder, JobClient, JobStorage};
