//! Storage engine handle.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use jobhive_config::StorageConfig;
use jobhive_core::{Clock, JobFields, Keys, QueueConvention, Store, SuffixConvention, SystemClock};

/// Job storage engine over a shared [`Store`].
///
/// Holds no job state of its own; every call reads from or writes to the
/// store. Cheap to clone.
#[derive(Clone)]
pub struct JobStorage {
    pub(crate) store: Arc<dyn Store>,
    pub(crate) keys: Keys,
    pub(crate) config: StorageConfig,
    pub(crate) convention: Arc<dyn QueueConvention>,
    pub(crate) clock: Arc<dyn Clock>,
}

impl JobStorage {
    pub fn new(store: Arc<dyn Store>, config: StorageConfig) -> Self {
        Self {
            store,
            keys: Keys::new(config.namespace.clone()),
            config,
            convention: Arc::new(SuffixConvention),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_convention(mut self, convention: Arc<dyn QueueConvention>) -> Self {
        self.convention = convention;
        self
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn keys(&self) -> &Keys {
        &self.keys
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

/// Merge optional caller fields into a job record write.
pub(crate) fn merge_fields(batch: &mut jobhive_core::Batch, job_key: &str, fields: Option<&JobFields>) {
    if let Some(fields) = fields {
        batch.hset_many(job_key, fields.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    }
}

pub(crate) fn score(at: DateTime<Utc>) -> f64 {
    at.timestamp() as f64
}
