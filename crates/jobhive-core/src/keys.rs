//! Key schema.
//!
//! Every entity the engine stores lives under one namespace. Identifier
//! components are escaped (`\` and `:`) so that two different
//! `(entity, identifier)` pairs can never produce the same key.

use std::borrow::Cow;

use chrono::{DateTime, NaiveDate, Utc};

/// Counter family for outcome statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatKind {
    Succeeded,
    Failed,
}

impl StatKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatKind::Succeeded => "succeeded",
            StatKind::Failed => "failed",
        }
    }
}

/// Maps entities to store keys.
#[derive(Debug, Clone)]
pub struct Keys {
    namespace: String,
}

impl Keys {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn key(&self, entity: &str) -> String {
        format!("{}:{}", self.namespace, entity)
    }

    fn keyed(&self, entity: &str, id: &str) -> String {
        format!("{}:{}:{}", self.namespace, entity, escape(id))
    }

    /// Job record hash.
    pub fn job(&self, id: &str) -> String {
        self.keyed("job", id)
    }

    /// Ownership record of an in-flight job.
    pub fn lease(&self, id: &str) -> String {
        self.keyed("lease", id)
    }

    /// Queue list.
    pub fn queue(&self, name: &str) -> String {
        self.keyed("queue", name)
    }

    /// Registry of known queue names.
    pub fn queues(&self) -> String {
        self.key("queues")
    }

    /// Servers bound to a queue.
    pub fn queue_servers(&self, name: &str) -> String {
        self.keyed("queue-servers", name)
    }

    /// Scheduled jobs, scored by due time.
    pub fn schedule(&self) -> String {
        self.key("schedule")
    }

    /// Jobs a server has taken from a queue but not yet finished.
    pub fn processing_list(&self, server: &str, queue: &str) -> String {
        format!(
            "{}:processing:{}:{}",
            self.namespace,
            escape(server),
            escape(queue)
        )
    }

    /// Set of every job currently in flight.
    pub fn processing_set(&self) -> String {
        self.key("processing")
    }

    /// Registry of announced servers.
    pub fn servers(&self) -> String {
        self.key("servers")
    }

    /// Server registration hash.
    pub fn server(&self, name: &str) -> String {
        self.keyed("server", name)
    }

    /// Queues a server has been bound to.
    pub fn server_queues(&self, name: &str) -> String {
        self.keyed("server-queues", name)
    }

    /// Failed jobs, scored by failure time.
    pub fn failed(&self) -> String {
        self.key("failed")
    }

    /// Most recently succeeded job ids, newest first.
    pub fn succeeded(&self) -> String {
        self.key("succeeded")
    }

    pub fn stats_processing(&self) -> String {
        self.key("stats:processing")
    }

    pub fn stats_total(&self, kind: StatKind) -> String {
        format!("{}:stats:{}", self.namespace, kind.as_str())
    }

    /// Daily bucket, `YYYY-MM-DD`.
    pub fn stats_daily(&self, kind: StatKind, date: NaiveDate) -> String {
        format!(
            "{}:stats:{}:{}",
            self.namespace,
            kind.as_str(),
            date.format("%Y-%m-%d")
        )
    }

    /// Hourly bucket, `YYYY-MM-DD-HH`.
    pub fn stats_hourly(&self, kind: StatKind, at: DateTime<Utc>) -> String {
        format!(
            "{}:stats:{}:{}",
            self.namespace,
            kind.as_str(),
            at.format("%Y-%m-%d-%H")
        )
    }
}

impl Default for Keys {
    fn default() -> Self {
        Self::new("jobhive")
    }
}

fn escape(component: &str) -> Cow<'_, str> {
    if !component.contains(['\\', ':']) {
        return Cow::Borrowed(component);
    }
    let mut escaped = String::with_capacity(component.len() + 4);
    for c in component.chars() {
        if c == '\\' || c == ':' {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    Cow::Owned(escaped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_entity_keys() {
        let keys = Keys::new("hive");
        assert_eq!(keys.job("42"), "hive:job:42");
        assert_eq!(keys.lease("42"), "hive:lease:42");
        assert_eq!(keys.queue("mail"), "hive:queue:mail");
        assert_eq!(keys.queues(), "hive:queues");
        assert_eq!(keys.queue_servers("mail"), "hive:queue-servers:mail");
        assert_eq!(keys.schedule(), "hive:schedule");
        assert_eq!(keys.processing_list("s1", "mail"), "hive:processing:s1:mail");
        assert_eq!(keys.processing_set(), "hive:processing");
        assert_eq!(keys.server("s1"), "hive:server:s1");
        assert_eq!(keys.server_queues("s1"), "hive:server-queues:s1");
        assert_eq!(keys.stats_processing(), "hive:stats:processing");
        assert_eq!(keys.stats_total(StatKind::Failed), "hive:stats:failed");
    }

    #[test]
    fn test_time_bucket_keys() {
        let keys = Keys::default();
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 7, 45, 12).unwrap();
        assert_eq!(
            keys.stats_daily(StatKind::Succeeded, at.date_naive()),
            "jobhive:stats:succeeded:2024-03-09"
        );
        assert_eq!(
            keys.stats_hourly(StatKind::Failed, at),
            "jobhive:stats:failed:2024-03-09-07"
        );
    }

    #[test]
    fn test_processing_list_is_injective() {
        let keys = Keys::default();
        // Without escaping both would be "jobhive:processing:a:b:c".
        assert_ne!(
            keys.processing_list("a:b", "c"),
            keys.processing_list("a", "b:c")
        );
        assert_eq!(
            keys.processing_list("a:b", "c"),
            "jobhive:processing:a\\:b:c"
        );
    }

    #[test]
    fn test_escape_backslash() {
        let keys = Keys::default();
        assert_ne!(
            keys.processing_list("a\\", ":b"),
            keys.processing_list("a\\:", "b")
        );
        assert_eq!(keys.job("x\\y"), "jobhive:job:x\\\\y");
    }

    #[test]
    fn test_entities_do_not_collide() {
        let keys = Keys::default();
        assert_ne!(keys.job("1"), keys.lease("1"));
        assert_ne!(keys.processing_set(), keys.stats_processing());
        assert_ne!(keys.server("queues"), keys.queues());
    }
}
