//! Retry wrapper for store operations.
//!
//! Transient failures (interrupted I/O, dropped connections) are retried with
//! bounded exponential backoff. Malformed responses are returned at once.
//! The cancellation token is checked before every attempt and while waiting.

use std::future::Future;
use std::time::Duration;

use jobhive_config::RetryConfig;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::error::{StoreError, StoreResult};

/// Runs store operations under a retry policy.
#[derive(Debug, Clone)]
pub struct Resilience {
    initial_backoff: Duration,
    max_backoff: Duration,
    multiplier: f64,
    max_attempts: Option<u32>,
    max_elapsed: Option<Duration>,
}

impl Resilience {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            initial_backoff: config.initial_backoff(),
            max_backoff: config.max_backoff(),
            multiplier: if config.multiplier.is_finite() {
                config.multiplier.max(1.0)
            } else {
                1.0
            },
            max_attempts: config.max_attempts,
            max_elapsed: config.max_elapsed(),
        }
    }

    fn next_delay(&self, delay: Duration) -> Duration {
        Duration::try_from_secs_f64(delay.as_secs_f64() * self.multiplier)
            .map_or(self.max_backoff, |next| next.min(self.max_backoff))
    }

    fn exhausted(&self, attempts: u32, started: Instant) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
            || self.max_elapsed.is_some_and(|max| started.elapsed() >= max)
    }

    /// Run `op` until it succeeds, fails fatally, runs out of budget or is cancelled.
    pub async fn run<T, F, Fut>(
        &self,
        operation: &str,
        cancel: &CancellationToken,
        mut op: F,
    ) -> StoreResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let started = Instant::now();
        let mut delay = self.initial_backoff;
        let mut attempts = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(StoreError::Cancelled);
            }
            attempts += 1;

            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !err.is_retryable() {
                if matches!(err, StoreError::Malformed(_)) {
                    error!(operation, error = %err, "Store returned a malformed response");
                }
                return Err(err);
            }

            if self.exhausted(attempts, started) {
                return Err(StoreError::RetriesExhausted {
                    operation: operation.to_string(),
                    attempts,
                    last: Box::new(err),
                });
            }

            warn!(
                operation,
                attempt = attempts,
                retry_in_ms = delay.as_millis() as u64,
                error = %err,
                "Transient store failure, retrying"
            );

            tokio::select! {
                _ = cancel.cancelled() => return Err(StoreError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
            delay = self.next_delay(delay);
        }
    }
}

impl Default for Resilience {
    fn default() -> Self {
        Self::new(&RetryConfig::default())
    }
}

#[cfg(test)]
#[path = "resilience_tests.rs"]
mod tests;
