//! Store abstraction.
//!
//! The engine only needs a handful of primitives from a key-value store:
//! atomic batches of writes, optimistic watch sessions, point reads and a
//! blocking list move. Backends implement [`Store`].

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreResult;

/// A single write inside a [`Batch`].
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    HashSet {
        key: String,
        fields: Vec<(String, String)>,
    },
    HashSetIfAbsent {
        key: String,
        field: String,
        value: String,
    },
    Delete {
        key: String,
    },
    SetAdd {
        key: String,
        member: String,
    },
    SetRemove {
        key: String,
        member: String,
    },
    ListPushFront {
        key: String,
        value: String,
    },
    ListPushBack {
        key: String,
        value: String,
    },
    /// Keep only the inclusive range `start..=stop`; negative indexes count from the end.
    ListTrim {
        key: String,
        start: isize,
        stop: isize,
    },
    /// Remove `count` occurrences of `value` (0 removes all).
    ListRemove {
        key: String,
        count: isize,
        value: String,
    },
    SortedSetAdd {
        key: String,
        member: String,
        score: f64,
    },
    SortedSetRemove {
        key: String,
        member: String,
    },
    Increment {
        key: String,
    },
    Decrement {
        key: String,
    },
    Expire {
        key: String,
        ttl: Duration,
    },
}

/// Writes applied together, never interleaved with another client's writes.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    commands: Vec<Command>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, command: Command) -> &mut Self {
        self.commands.push(command);
        self
    }

    pub fn hset(
        &mut self,
        key: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<String>,
    ) -> &mut Self {
        self.push(Command::HashSet {
            key: key.into(),
            fields: vec![(field.into(), value.into())],
        })
    }

    /// Set many fields at once; an empty iterator adds nothing.
    pub fn hset_many<I, F, V>(&mut self, key: impl Into<String>, fields: I) -> &mut Self
    where
        I: IntoIterator<Item = (F, V)>,
        F: Into<String>,
        V: Into<String>,
    {
        let fields: Vec<(String, String)> = fields
            .into_iter()
            .map(|(f, v)| (f.into(), v.into()))
            .collect();
        if fields.is_empty() {
            return self;
        }
        self.push(Command::HashSet {
            key: key.into(),
            fields,
        })
    }

    pub fn hsetnx(
        &mut self,
        key: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<String>,
    ) -> &mut Self {
        self.push(Command::HashSetIfAbsent {
            key: key.into(),
            field: field.into(),
            value: value.into(),
        })
    }

    pub fn del(&mut self, key: impl Into<String>) -> &mut Self {
        self.push(Command::Delete { key: key.into() })
    }

    pub fn sadd(&mut self, key: impl Into<String>, member: impl Into<String>) -> &mut Self {
        self.push(Command::SetAdd {
            key: key.into(),
            member: member.into(),
        })
    }

    pub fn srem(&mut self, key: impl Into<String>, member: impl Into<String>) -> &mut Self {
        self.push(Command::SetRemove {
            key: key.into(),
            member: member.into(),
        })
    }

    pub fn lpush(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.push(Command::ListPushFront {
            key: key.into(),
            value: value.into(),
        })
    }

    pub fn rpush(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.push(Command::ListPushBack {
            key: key.into(),
            value: value.into(),
        })
    }

    pub fn ltrim(&mut self, key: impl Into<String>, start: isize, stop: isize) -> &mut Self {
        self.push(Command::ListTrim {
            key: key.into(),
            start,
            stop,
        })
    }

    pub fn lrem(
        &mut self,
        key: impl Into<String>,
        count: isize,
        value: impl Into<String>,
    ) -> &mut Self {
        self.push(Command::ListRemove {
            key: key.into(),
            count,
            value: value.into(),
        })
    }

    pub fn zadd(
        &mut self,
        key: impl Into<String>,
        member: impl Into<String>,
        score: f64,
    ) -> &mut Self {
        self.push(Command::SortedSetAdd {
            key: key.into(),
            member: member.into(),
            score,
        })
    }

    pub fn zrem(&mut self, key: impl Into<String>, member: impl Into<String>) -> &mut Self {
        self.push(Command::SortedSetRemove {
            key: key.into(),
            member: member.into(),
        })
    }

    pub fn incr(&mut self, key: impl Into<String>) -> &mut Self {
        self.push(Command::Increment { key: key.into() })
    }

    pub fn decr(&mut self, key: impl Into<String>) -> &mut Self {
        self.push(Command::Decrement { key: key.into() })
    }

    pub fn expire(&mut self, key: impl Into<String>, ttl: Duration) -> &mut Self {
        self.push(Command::Expire {
            key: key.into(),
            ttl,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn into_commands(self) -> Vec<Command> {
        self.commands
    }
}

/// Shared key-value store.
#[async_trait]
pub trait Store: Send + Sync {
    /// Apply a batch atomically.
    async fn exec(&self, batch: Batch) -> StoreResult<()>;

    /// Start an optimistic session over `keys`.
    ///
    /// A later [`WatchSession::commit`] is applied only if none of the
    /// watched keys changed in between.
    async fn watch(&self, keys: &[String]) -> StoreResult<Box<dyn WatchSession>>;

    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    async fn mget(&self, keys: &[String]) -> StoreResult<Vec<Option<String>>>;

    async fn hget(&self, key: &str, field: &str) -> StoreResult<Option<String>>;

    /// Values aligned with `fields`.
    async fn hmget(&self, key: &str, fields: &[&str]) -> StoreResult<Vec<Option<String>>>;

    /// All fields of a hash; empty when the key does not exist.
    async fn hgetall(&self, key: &str) -> StoreResult<BTreeMap<String, String>>;

    async fn smembers(&self, key: &str) -> StoreResult<Vec<String>>;

    async fn scard(&self, key: &str) -> StoreResult<u64>;

    async fn llen(&self, key: &str) -> StoreResult<u64>;

    /// Inclusive range; negative indexes count from the end.
    async fn lrange(&self, key: &str, start: isize, stop: isize) -> StoreResult<Vec<String>>;

    async fn zcard(&self, key: &str) -> StoreResult<u64>;

    async fn zscore(&self, key: &str, member: &str) -> StoreResult<Option<f64>>;

    /// Members by rank (ascending score), inclusive range.
    async fn zrange_with_scores(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> StoreResult<Vec<(String, f64)>>;

    /// Members with `min <= score <= max`, lowest first.
    async fn zrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: Option<usize>,
    ) -> StoreResult<Vec<String>>;

    /// Remaining time to live; `None` when the key is missing or never expires.
    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>>;

    async fn hset(&self, key: &str, field: &str, value: &str) -> StoreResult<()>;

    /// Remove up to `count` occurrences (0 removes all); returns how many were removed.
    async fn lrem(&self, key: &str, count: isize, value: &str) -> StoreResult<u64>;

    /// Atomically pop the head of `source` and push it onto the tail of `destination`.
    async fn move_item(&self, source: &str, destination: &str) -> StoreResult<Option<String>>;

    /// Like [`Store::move_item`], waiting up to `timeout` for `source` to receive an item.
    async fn blocking_move_item(
        &self,
        source: &str,
        destination: &str,
        timeout: Duration,
    ) -> StoreResult<Option<String>>;
}

/// Reads and a conditional commit over a set of watched keys.
#[async_trait]
pub trait WatchSession: Send {
    async fn zrange_by_score(
        &mut self,
        key: &str,
        min: f64,
        max: f64,
        limit: Option<usize>,
    ) -> StoreResult<Vec<String>>;

    async fn hget(&mut self, key: &str, field: &str) -> StoreResult<Option<String>>;

    async fn hexists(&mut self, key: &str, field: &str) -> StoreResult<bool>;

    async fn zscore(&mut self, key: &str, member: &str) -> StoreResult<Option<f64>>;

    /// Apply `batch` if no watched key changed; `false` means nothing was applied.
    async fn commit(&mut self, batch: Batch) -> StoreResult<bool>;

    /// Drop the watch without writing anything.
    async fn unwatch(&mut self) -> StoreResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_builder_chains() {
        let mut batch = Batch::new();
        batch
            .hset("job:1", "Type", "send")
            .sadd("queues", "mail")
            .rpush("queue:mail", "1")
            .incr("stats:processing");

        assert_eq!(batch.len(), 4);
        assert_eq!(
            batch.commands()[2],
            Command::ListPushBack {
                key: "queue:mail".to_string(),
                value: "1".to_string(),
            }
        );
    }

    #[test]
    fn test_hset_many_skips_empty() {
        let mut batch = Batch::new();
        batch.hset_many("job:1", Vec::<(String, String)>::new());
        assert!(batch.is_empty());

        batch.hset_many("job:1", [("Type", "send"), ("Args", "{}")]);
        assert_eq!(batch.len(), 1);
        match &batch.commands()[0] {
            Command::HashSet { fields, .. } => assert_eq!(fields.len(), 2),
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
