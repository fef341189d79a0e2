//! Schedule poller: moves due jobs onto their queues.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use jobhive_core::{Resilience, StoreResult};
use jobhive_storage::JobStorage;

pub struct SchedulePoller {
    storage: JobStorage,
    resilience: Resilience,
    poll_interval: Duration,
}

impl SchedulePoller {
    pub fn new(storage: JobStorage, resilience: Resilience, poll_interval: Duration) -> Self {
        Self {
            storage,
            resilience,
            poll_interval,
        }
    }

    /// Poll until `cancel` fires. A fatal store error cancels `cancel` and is returned.
    pub async fn run(self, cancel: CancellationToken) -> StoreResult<()> {
        info!(interval_ms = self.poll_interval.as_millis() as u64, "Schedule poller started");

        loop {
            match self.drain(&cancel).await {
                Ok(0) => {}
                Ok(promoted) => debug!(promoted, "Promoted due jobs"),
                Err(err) if err.is_cancelled() => break,
                Err(err) if err.is_fatal() => {
                    error!(error = %err, "Store is inconsistent, halting server");
                    cancel.cancel();
                    return Err(err);
                }
                Err(err) => error!(error = %err, "Schedule poll failed"),
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        info!("Schedule poller stopped");
        Ok(())
    }

    /// Promote every job due now. Stops early when a promotion loses a race.
    pub async fn drain(&self, cancel: &CancellationToken) -> StoreResult<usize> {
        let storage = &self.storage;
        let mut promoted = 0;
        while !cancel.is_cancelled() {
            let now = storage.now();
            let moved = self
                .resilience
                .run("promote due job", cancel, move || storage.promote_due(now))
                .await?;
            if !moved {
                break;
            }
            promoted += 1;
        }
        Ok(promoted)
    }
}
