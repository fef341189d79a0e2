//! Configuration validation.

use crate::schema::Config;

/// One finding, keyed by the dotted path of the offending setting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub path: &'static str,
    pub message: String,
}

/// Errors make a configuration unusable; warnings are only logged.
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, path: &'static str, message: impl Into<String>) {
        self.errors.push(ValidationIssue {
            path,
            message: message.into(),
        });
    }

    fn warn(&mut self, path: &'static str, message: impl Into<String>) {
        self.warnings.push(ValidationIssue {
            path,
            message: message.into(),
        });
    }
}

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Check every section and collect what is wrong with it.
    pub fn validate(config: &Config) -> ValidationReport {
        let mut report = ValidationReport::default();
        Self::validate_storage(config, &mut report);
        Self::validate_retry(config, &mut report);
        Self::validate_server(config, &mut report);
        report
    }

    fn validate_storage(config: &Config, report: &mut ValidationReport) {
        let storage = &config.storage;

        if storage.namespace.is_empty() {
            report.error("storage.namespace", "Namespace cannot be empty");
        }
        if !storage.redis_url.starts_with("redis://") && !storage.redis_url.starts_with("rediss://")
        {
            report.error(
                "storage.redis_url",
                "redis_url must start with redis:// or rediss://",
            );
        }
        if storage.job_expiration_secs == 0 {
            report.error(
                "storage.job_expiration_secs",
                "job_expiration_secs must be greater than 0",
            );
        }
        if storage.succeeded_list_size == 0 {
            report.error(
                "storage.succeeded_list_size",
                "succeeded_list_size must be greater than 0",
            );
        }

        // Daily buckets that expire before the timeline window ends show up as zero.
        let window_secs = u64::from(storage.timeline_days + 1) * 86_400;
        if storage.daily_stats_ttl_secs < window_secs {
            report.warn(
                "storage.daily_stats_ttl_secs",
                format!(
                    "daily buckets expire after {}s, older days of the {}-day timeline will read as zero",
                    storage.daily_stats_ttl_secs, storage.timeline_days
                ),
            );
        }
    }

    fn validate_retry(config: &Config, report: &mut ValidationReport) {
        let retry = &config.retry;

        if !retry.multiplier.is_finite() {
            report.error("retry.multiplier", "multiplier must be a finite number");
        } else if retry.multiplier < 1.0 {
            report.error("retry.multiplier", "multiplier must be at least 1.0");
        }
        if retry.max_backoff_ms < retry.initial_backoff_ms {
            report.error(
                "retry.max_backoff_ms",
                "max_backoff_ms must not be lower than initial_backoff_ms",
            );
        }
        if retry.initial_backoff_ms == 0 {
            report.warn(
                "retry.initial_backoff_ms",
                "zero initial backoff retries store failures in a tight loop",
            );
        }
        if retry.max_attempts == Some(0) {
            report.error(
                "retry.max_attempts",
                "max_attempts must be greater than 0 when set",
            );
        }
    }

    fn validate_server(config: &Config, report: &mut ValidationReport) {
        let server = &config.server;

        if server.queue.is_empty() {
            report.error("server.queue", "Queue cannot be empty");
        }
        if server.concurrency == 0 {
            report.error("server.concurrency", "concurrency must be greater than 0");
        }
        if server.concurrency > 256 {
            report.warn(
                "server.concurrency",
                "concurrency is very high (>256), each worker holds a blocking store connection",
            );
        }
        if server.dequeue_timeout_secs == 0 {
            report.error(
                "server.dequeue_timeout_secs",
                "dequeue_timeout_secs must be greater than 0",
            );
        }
        if server.name.as_deref() == Some("") {
            report.error("server.name", "Name cannot be empty");
        }
    }
}

#[cfg(test)]
#[path = "validator_tests.rs"]
mod tests;
