//! # jobhive server
//!
//! Runtime that executes jobs stored by [`jobhive_storage`].
//!
//! ## Features
//!
//! - **Performers**: register one [`JobPerformer`] per job type
//! - **Workers**: dequeue, run and record outcomes, capturing panics as failures
//! - **Schedule poller**: promotes due scheduled jobs
//! - **Lifecycle**: announce, crash recovery, graceful stop and retire

mod error;
mod performer;
mod scheduler;
mod server;
mod worker;

pub use error::{PerformError, ServerError, ServerResult};
pub use performer::{JobInvocation, JobPerformer, PerformerRegistry};
pub use scheduler::SchedulePoller;
pub use server::JobServer;
pub use worker::{Worker, WorkerContext, WorkerStats};
