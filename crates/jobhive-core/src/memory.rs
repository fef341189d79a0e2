//! In-memory store backend.
//!
//! Mirrors the Redis data model closely enough for the engine: typed values,
//! empty collections disappear, lazy expiry, per-key versions for watch
//! sessions and a wakeup for blocked list moves.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::trace;

use crate::error::{StoreError, StoreResult};
use crate::store::{Batch, Command, Store, WatchSession};

#[derive(Debug, Clone)]
enum Value {
    Text(String),
    Hash(BTreeMap<String, String>),
    List(VecDeque<String>),
    Set(BTreeSet<String>),
    Sorted(BTreeMap<String, f64>),
}

impl Value {
    fn is_empty(&self) -> bool {
        match self {
            Value::Text(_) => false,
            Value::Hash(h) => h.is_empty(),
            Value::List(l) => l.is_empty(),
            Value::Set(s) => s.is_empty(),
            Value::Sorted(z) => z.is_empty(),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Value::Text(_) => "string",
            Value::Hash(_) => "hash",
            Value::List(_) => "list",
            Value::Set(_) => "set",
            Value::Sorted(_) => "zset",
        }
    }
}

#[derive(Debug)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

#[derive(Debug, Default)]
struct State {
    entries: HashMap<String, Entry>,
    versions: HashMap<String, u64>,
    tick: u64,
}

fn wrong_type(key: &str, found: &Value) -> StoreError {
    StoreError::Malformed(format!(
        "WRONGTYPE operation against key '{}' holding a {}",
        key,
        found.kind()
    ))
}

/// Resolve an inclusive, possibly negative range against `len`.
fn normalize_range(len: usize, start: isize, stop: isize) -> Option<(usize, usize)> {
    let len = len as isize;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize))
}

fn by_score(members: &BTreeMap<String, f64>) -> Vec<(String, f64)> {
    let mut ranked: Vec<(String, f64)> = members.iter().map(|(m, s)| (m.clone(), *s)).collect();
    ranked.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
    ranked
}

impl State {
    fn touch(&mut self, key: &str) {
        self.tick += 1;
        self.versions.insert(key.to_string(), self.tick);
    }

    fn purge(&mut self, key: &str) {
        let expired = self
            .entries
            .get(key)
            .and_then(|e| e.expires_at)
            .is_some_and(|at| at <= Instant::now());
        if expired {
            self.entries.remove(key);
            self.touch(key);
        }
    }

    fn version(&mut self, key: &str) -> u64 {
        self.purge(key);
        self.versions.get(key).copied().unwrap_or(0)
    }

    fn read(&mut self, key: &str) -> Option<&Value> {
        self.purge(key);
        self.entries.get(key).map(|e| &e.value)
    }

    fn write(&mut self, key: &str, init: fn() -> Value) -> &mut Value {
        self.purge(key);
        self.touch(key);
        &mut self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry {
                value: init(),
                expires_at: None,
            })
            .value
    }

    /// Drop a collection that became empty.
    fn settle(&mut self, key: &str) {
        if self.entries.get(key).is_some_and(|e| e.value.is_empty()) {
            self.entries.remove(key);
        }
    }

    fn text(&mut self, key: &str) -> StoreResult<Option<&String>> {
        match self.read(key) {
            None => Ok(None),
            Some(Value::Text(s)) => Ok(Some(s)),
            Some(other) => Err(wrong_type(key, other)),
        }
    }

    fn hash(&mut self, key: &str) -> StoreResult<Option<&BTreeMap<String, String>>> {
        match self.read(key) {
            None => Ok(None),
            Some(Value::Hash(h)) => Ok(Some(h)),
            Some(other) => Err(wrong_type(key, other)),
        }
    }

    fn list(&mut self, key: &str) -> StoreResult<Option<&VecDeque<String>>> {
        match self.read(key) {
            None => Ok(None),
            Some(Value::List(l)) => Ok(Some(l)),
            Some(other) => Err(wrong_type(key, other)),
        }
    }

    fn set(&mut self, key: &str) -> StoreResult<Option<&BTreeSet<String>>> {
        match self.read(key) {
            None => Ok(None),
            Some(Value::Set(s)) => Ok(Some(s)),
            Some(other) => Err(wrong_type(key, other)),
        }
    }

    fn sorted(&mut self, key: &str) -> StoreResult<Option<&BTreeMap<String, f64>>> {
        match self.read(key) {
            None => Ok(None),
            Some(Value::Sorted(z)) => Ok(Some(z)),
            Some(other) => Err(wrong_type(key, other)),
        }
    }

    fn hash_mut(&mut self, key: &str) -> StoreResult<&mut BTreeMap<String, String>> {
        match self.write(key, || Value::Hash(BTreeMap::new())) {
            Value::Hash(h) => Ok(h),
            other => Err(wrong_type(key, other)),
        }
    }

    fn list_mut(&mut self, key: &str) -> StoreResult<&mut VecDeque<String>> {
        match self.write(key, || Value::List(VecDeque::new())) {
            Value::List(l) => Ok(l),
            other => Err(wrong_type(key, other)),
        }
    }

    fn set_mut(&mut self, key: &str) -> StoreResult<&mut BTreeSet<String>> {
        match self.write(key, || Value::Set(BTreeSet::new())) {
            Value::Set(s) => Ok(s),
            other => Err(wrong_type(key, other)),
        }
    }

    fn sorted_mut(&mut self, key: &str) -> StoreResult<&mut BTreeMap<String, f64>> {
        match self.write(key, || Value::Sorted(BTreeMap::new())) {
            Value::Sorted(z) => Ok(z),
            other => Err(wrong_type(key, other)),
        }
    }

    fn add_to_counter(&mut self, key: &str, delta: i64) -> StoreResult<i64> {
        let raw = match self.write(key, || Value::Text("0".to_string())) {
            Value::Text(raw) => raw,
            other => return Err(wrong_type(key, other)),
        };
        let current: i64 = raw.parse().map_err(|_| {
            StoreError::Malformed(format!("value at '{}' is not an integer", key))
        })?;
        let next = current + delta;
        *raw = next.to_string();
        Ok(next)
    }

    fn remove_from_list(&mut self, key: &str, count: isize, value: &str) -> StoreResult<u64> {
        if self.list(key)?.is_none() {
            return Ok(0);
        }
        let list = self.list_mut(key)?;
        let limit = if count == 0 { usize::MAX } else { count.unsigned_abs() };
        let mut removed = 0usize;
        if count >= 0 {
            let mut i = 0;
            while i < list.len() && removed < limit {
                if list[i] == value {
                    list.remove(i);
                    removed += 1;
                } else {
                    i += 1;
                }
            }
        } else {
            let mut i = list.len();
            while i > 0 && removed < limit {
                i -= 1;
                if list[i] == value {
                    list.remove(i);
                    removed += 1;
                }
            }
        }
        self.settle(key);
        Ok(removed as u64)
    }

    fn pop_push(&mut self, source: &str, destination: &str) -> StoreResult<Option<String>> {
        // Type-check both ends before touching either.
        let has_item = self.list(source)?.is_some_and(|l| !l.is_empty());
        self.list(destination)?;
        if !has_item {
            return Ok(None);
        }
        let item = self.list_mut(source)?.pop_front();
        self.settle(source);
        if let Some(item) = &item {
            self.list_mut(destination)?.push_back(item.clone());
        }
        Ok(item)
    }

    /// Apply one command; returns whether a list received an item.
    fn apply(&mut self, command: &Command) -> StoreResult<bool> {
        let mut pushed = false;
        match command {
            Command::HashSet { key, fields } => {
                let hash = self.hash_mut(key)?;
                for (field, value) in fields {
                    hash.insert(field.clone(), value.clone());
                }
            }
            Command::HashSetIfAbsent { key, field, value } => {
                self.hash_mut(key)?
                    .entry(field.clone())
                    .or_insert_with(|| value.clone());
            }
            Command::Delete { key } => {
                self.purge(key);
                if self.entries.remove(key).is_some() {
                    self.touch(key);
                }
            }
            Command::SetAdd { key, member } => {
                self.set_mut(key)?.insert(member.clone());
            }
            Command::SetRemove { key, member } => {
                if self.set(key)?.is_some() {
                    self.set_mut(key)?.remove(member);
                    self.settle(key);
                }
            }
            Command::ListPushFront { key, value } => {
                self.list_mut(key)?.push_front(value.clone());
                pushed = true;
            }
            Command::ListPushBack { key, value } => {
                self.list_mut(key)?.push_back(value.clone());
                pushed = true;
            }
            Command::ListTrim { key, start, stop } => {
                if self.list(key)?.is_some() {
                    let list = self.list_mut(key)?;
                    match normalize_range(list.len(), *start, *stop) {
                        Some((from, to)) => {
                            list.truncate(to + 1);
                            list.drain(..from);
                        }
                        None => list.clear(),
                    }
                    self.settle(key);
                }
            }
            Command::ListRemove { key, count, value } => {
                self.remove_from_list(key, *count, value)?;
            }
            Command::SortedSetAdd { key, member, score } => {
                self.sorted_mut(key)?.insert(member.clone(), *score);
            }
            Command::SortedSetRemove { key, member } => {
                if self.sorted(key)?.is_some() {
                    self.sorted_mut(key)?.remove(member);
                    self.settle(key);
                }
            }
            Command::Increment { key } => {
                self.add_to_counter(key, 1)?;
            }
            Command::Decrement { key } => {
                self.add_to_counter(key, -1)?;
            }
            Command::Expire { key, ttl } => {
                self.purge(key);
                if ttl.is_zero() {
                    if self.entries.remove(key).is_some() {
                        self.touch(key);
                    }
                } else if let Some(entry) = self.entries.get_mut(key) {
                    entry.expires_at = Some(Instant::now() + *ttl);
                    self.touch(key);
                }
            }
        }
        Ok(pushed)
    }

    /// Apply every command, reporting the first failure like a transaction reply would.
    fn apply_batch(&mut self, batch: &Batch) -> StoreResult<bool> {
        let mut pushed = false;
        let mut first_error = None;
        for command in batch.commands() {
            match self.apply(command) {
                Ok(p) => pushed |= p,
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(pushed),
        }
    }

    fn zrange_by_score(
        &mut self,
        key: &str,
        min: f64,
        max: f64,
        limit: Option<usize>,
    ) -> StoreResult<Vec<String>> {
        let Some(members) = self.sorted(key)? else {
            return Ok(Vec::new());
        };
        Ok(by_score(members)
            .into_iter()
            .filter(|(_, score)| *score >= min && *score <= max)
            .take(limit.unwrap_or(usize::MAX))
            .map(|(member, _)| member)
            .collect())
    }
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<State>,
    pushed: Notify,
}

impl Shared {
    fn exec(&self, batch: &Batch) -> StoreResult<()> {
        let result = self.state.lock().apply_batch(batch);
        // Wake blocked movers even when a later command failed.
        self.pushed.notify_waiters();
        result.map(|_| ())
    }
}

/// In-memory [`Store`].
///
/// Cloning yields another handle to the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn exec(&self, batch: Batch) -> StoreResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        trace!(commands = batch.len(), "Applying batch");
        self.shared.exec(&batch)
    }

    async fn watch(&self, keys: &[String]) -> StoreResult<Box<dyn WatchSession>> {
        let mut state = self.shared.state.lock();
        let watched = keys
            .iter()
            .map(|key| (key.clone(), state.version(key)))
            .collect();
        Ok(Box::new(MemoryWatch {
            shared: self.shared.clone(),
            watched,
            open: true,
        }))
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.shared.state.lock().text(key)?.cloned())
    }

    async fn mget(&self, keys: &[String]) -> StoreResult<Vec<Option<String>>> {
        let mut state = self.shared.state.lock();
        // A key of another type reads as missing, like MGET.
        Ok(keys
            .iter()
            .map(|key| state.text(key).ok().flatten().cloned())
            .collect())
    }

    async fn hget(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
        Ok(self
            .shared
            .state
            .lock()
            .hash(key)?
            .and_then(|h| h.get(field).cloned()))
    }

    async fn hmget(&self, key: &str, fields: &[&str]) -> StoreResult<Vec<Option<String>>> {
        let mut state = self.shared.state.lock();
        let hash = state.hash(key)?;
        Ok(fields
            .iter()
            .map(|field| hash.and_then(|h| h.get(*field).cloned()))
            .collect())
    }

    async fn hgetall(&self, key: &str) -> StoreResult<BTreeMap<String, String>> {
        Ok(self
            .shared
            .state
            .lock()
            .hash(key)?
            .cloned()
            .unwrap_or_default())
    }

    async fn smembers(&self, key: &str) -> StoreResult<Vec<String>> {
        Ok(self
            .shared
            .state
            .lock()
            .set(key)?
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn scard(&self, key: &str) -> StoreResult<u64> {
        Ok(self.shared.state.lock().set(key)?.map_or(0, |s| s.len() as u64))
    }

    async fn llen(&self, key: &str) -> StoreResult<u64> {
        Ok(self.shared.state.lock().list(key)?.map_or(0, |l| l.len() as u64))
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> StoreResult<Vec<String>> {
        let mut state = self.shared.state.lock();
        let Some(list) = state.list(key)? else {
            return Ok(Vec::new());
        };
        Ok(match normalize_range(list.len(), start, stop) {
            Some((from, to)) => list.range(from..=to).cloned().collect(),
            None => Vec::new(),
        })
    }

    async fn zcard(&self, key: &str) -> StoreResult<u64> {
        Ok(self
            .shared
            .state
            .lock()
            .sorted(key)?
            .map_or(0, |z| z.len() as u64))
    }

    async fn zscore(&self, key: &str, member: &str) -> StoreResult<Option<f64>> {
        Ok(self
            .shared
            .state
            .lock()
            .sorted(key)?
            .and_then(|z| z.get(member).copied()))
    }

    async fn zrange_with_scores(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> StoreResult<Vec<(String, f64)>> {
        let mut state = self.shared.state.lock();
        let Some(members) = state.sorted(key)? else {
            return Ok(Vec::new());
        };
        let ranked = by_score(members);
        Ok(match normalize_range(ranked.len(), start, stop) {
            Some((from, to)) => ranked[from..=to].to_vec(),
            None => Vec::new(),
        })
    }

    async fn zrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: Option<usize>,
    ) -> StoreResult<Vec<String>> {
        self.shared.state.lock().zrange_by_score(key, min, max, limit)
    }

    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        let mut state = self.shared.state.lock();
        state.purge(key);
        Ok(state
            .entries
            .get(key)
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(Instant::now())))
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> StoreResult<()> {
        let mut batch = Batch::new();
        batch.hset(key, field, value);
        self.shared.exec(&batch)
    }

    async fn lrem(&self, key: &str, count: isize, value: &str) -> StoreResult<u64> {
        self.shared.state.lock().remove_from_list(key, count, value)
    }

    async fn move_item(&self, source: &str, destination: &str) -> StoreResult<Option<String>> {
        let item = self.shared.state.lock().pop_push(source, destination)?;
        if item.is_some() {
            self.shared.pushed.notify_waiters();
        }
        Ok(item)
    }

    async fn blocking_move_item(
        &self,
        source: &str,
        destination: &str,
        timeout: Duration,
    ) -> StoreResult<Option<String>> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.shared.pushed.notified();
            tokio::pin!(notified);
            // Register before checking so a push in between is not missed.
            notified.as_mut().enable();

            if let Some(item) = self.move_item(source, destination).await? {
                return Ok(Some(item));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }
}

struct MemoryWatch {
    shared: Arc<Shared>,
    watched: Vec<(String, u64)>,
    open: bool,
}

impl MemoryWatch {
    fn ensure_open(&self) -> StoreResult<()> {
        if self.open {
            Ok(())
        } else {
            Err(StoreError::Malformed("watch session already closed".to_string()))
        }
    }
}

#[async_trait]
impl WatchSession for MemoryWatch {
    async fn zrange_by_score(
        &mut self,
        key: &str,
        min: f64,
        max: f64,
        limit: Option<usize>,
    ) -> StoreResult<Vec<String>> {
        self.ensure_open()?;
        self.shared.state.lock().zrange_by_score(key, min, max, limit)
    }

    async fn hget(&mut self, key: &str, field: &str) -> StoreResult<Option<String>> {
        self.ensure_open()?;
        Ok(self
            .shared
            .state
            .lock()
            .hash(key)?
            .and_then(|h| h.get(field).cloned()))
    }

    async fn hexists(&mut self, key: &str, field: &str) -> StoreResult<bool> {
        self.ensure_open()?;
        Ok(self
            .shared
            .state
            .lock()
            .hash(key)?
            .is_some_and(|h| h.contains_key(field)))
    }

    async fn zscore(&mut self, key: &str, member: &str) -> StoreResult<Option<f64>> {
        self.ensure_open()?;
        Ok(self
            .shared
            .state
            .lock()
            .sorted(key)?
            .and_then(|z| z.get(member).copied()))
    }

    async fn commit(&mut self, batch: Batch) -> StoreResult<bool> {
        self.ensure_open()?;
        self.open = false;
        let result = {
            let mut state = self.shared.state.lock();
            let unchanged = self
                .watched
                .iter()
                .all(|(key, version)| state.version(key) == *version);
            if !unchanged {
                return Ok(false);
            }
            state.apply_batch(&batch)
        };
        self.shared.pushed.notify_waiters();
        result.map(|_| true)
    }

    async fn unwatch(&mut self) -> StoreResult<()> {
        self.open = false;
        Ok(())
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
