//! # jobhive storage
//!
//! Turns a shared key-value [`Store`](jobhive_core::Store) into a
//! multi-producer, multi-consumer job queue.
//!
//! ## Features
//!
//! - **Job records**: per-job hashes with additive lifecycle fields
//! - **Queues and schedule**: FIFO queues, delayed jobs and exclusive promotion
//! - **Worker coordination**: server registry, leases and crash recovery
//! - **Outcomes**: success/failure transitions, retry and discard
//! - **Monitoring**: counters, listings and daily/hourly timelines

mod client;
mod coordination;
mod monitoring;
mod outcome;
mod queues;
mod records;
mod storage;

pub use client::{ArgsBuilder, JobClient};
pub use coordination::JobLease;
pub use monitoring::{
    DailyCount, EnqueuedJob, FailedJob, HourlyCount, JobDetails, ProcessingJob, QueueSummary,
    ScheduledJob, ServerInfo, Statistics, SucceededJob,
};
pub use storage::JobStorage;
