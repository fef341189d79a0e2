//! # jobhive core
//!
//! Building blocks shared by the jobhive storage engine and job servers.
//!
//! ## Features
//!
//! - **Store abstraction**: atomic batches, optimistic watch sessions and
//!   blocking list moves behind the [`Store`] trait
//! - **Backends**: [`MemoryStore`] for tests and single-process use, and a
//!   Redis backend behind the `redis` cargo feature
//! - **Key schema**: injective, namespaced keys for every stored entity
//! - **Job model**: ids, field names, argument bags and outcomes
//! - **Resilience**: bounded exponential backoff for transient store failures

pub mod clock;
pub mod codec;
pub mod convention;
pub mod error;
pub mod job;
pub mod keys;
pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;
pub mod resilience;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use convention::{QueueConvention, SuffixConvention};
pub use error::{StoreError, StoreResult};
pub use job::{JobArgs, JobFailure, JobFields, JobId, JobOutcome, fields};
pub use keys::{Keys, StatKind};
pub use memory::MemoryStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisStore;
pub use resilience::Resilience;
pub use store::{Batch, Command, Store, WatchSession};
