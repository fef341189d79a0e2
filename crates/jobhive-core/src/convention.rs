//! Queue-name convention.

/// Derives a queue name from a job type identifier.
///
/// Used only when a job record carries no explicit queue.
pub trait QueueConvention: Send + Sync {
    fn queue_for(&self, job_type: &str) -> Option<String>;
}

/// Reads the queue from a `handler@queue` suffix.
#[derive(Debug, Clone, Copy, Default)]
pub struct SuffixConvention;

impl QueueConvention for SuffixConvention {
    fn queue_for(&self, job_type: &str) -> Option<String> {
        let (handler, queue) = job_type.rsplit_once('@')?;
        if handler.is_empty() || queue.is_empty() {
            return None;
        }
        Some(queue.to_string())
    }
}
