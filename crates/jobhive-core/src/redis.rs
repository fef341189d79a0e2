//! Redis store backend.
//!
//! Batches run as `MULTI`/`EXEC` pipelines on a shared multiplexed
//! connection. Watch sessions and blocking moves need a connection of their
//! own, since `WATCH` state and `BLMOVE` are per connection; those are taken
//! from a small idle pool and handed back once the session ends cleanly.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::MultiplexedConnection;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::store::{Batch, Command, Store, WatchSession};

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error() {
            StoreError::Interrupted(err.to_string())
        } else if err.is_connection_dropped() || err.is_connection_refusal() || err.is_timeout() {
            StoreError::Connection(err.to_string())
        } else {
            StoreError::Malformed(err.to_string())
        }
    }
}

fn add_command(pipe: &mut redis::Pipeline, command: &Command) {
    match command {
        Command::HashSet { key, fields } => {
            let cmd = pipe.cmd("HSET").arg(key);
            for (field, value) in fields {
                cmd.arg(field).arg(value);
            }
        }
        Command::HashSetIfAbsent { key, field, value } => {
            pipe.cmd("HSETNX").arg(key).arg(field).arg(value);
        }
        Command::Delete { key } => {
            pipe.cmd("DEL").arg(key);
        }
        Command::SetAdd { key, member } => {
            pipe.cmd("SADD").arg(key).arg(member);
        }
        Command::SetRemove { key, member } => {
            pipe.cmd("SREM").arg(key).arg(member);
        }
        Command::ListPushFront { key, value } => {
            pipe.cmd("LPUSH").arg(key).arg(value);
        }
        Command::ListPushBack { key, value } => {
            pipe.cmd("RPUSH").arg(key).arg(value);
        }
        Command::ListTrim { key, start, stop } => {
            pipe.cmd("LTRIM").arg(key).arg(*start).arg(*stop);
        }
        Command::ListRemove { key, count, value } => {
            pipe.cmd("LREM").arg(key).arg(*count).arg(value);
        }
        Command::SortedSetAdd { key, member, score } => {
            pipe.cmd("ZADD").arg(key).arg(*score).arg(member);
        }
        Command::SortedSetRemove { key, member } => {
            pipe.cmd("ZREM").arg(key).arg(member);
        }
        Command::Increment { key } => {
            pipe.cmd("INCR").arg(key);
        }
        Command::Decrement { key } => {
            pipe.cmd("DECR").arg(key);
        }
        Command::Expire { key, ttl } => {
            pipe.cmd("PEXPIRE").arg(key).arg(ttl.as_millis() as u64);
        }
    }
}

fn transaction(batch: &Batch) -> redis::Pipeline {
    let mut pipe = redis::pipe();
    pipe.atomic();
    for command in batch.commands() {
        add_command(&mut pipe, command);
    }
    pipe
}

fn zrange_by_score_cmd(key: &str, min: f64, max: f64, limit: Option<usize>) -> redis::Cmd {
    let mut cmd = redis::cmd("ZRANGEBYSCORE");
    cmd.arg(key).arg(min).arg(max);
    if let Some(limit) = limit {
        cmd.arg("LIMIT").arg(0).arg(limit);
    }
    cmd
}

/// Idle connections kept for reuse.
const MAX_IDLE_CONNECTIONS: usize = 32;

struct IdleConnections<C> {
    idle: Mutex<Vec<C>>,
    capacity: usize,
}

impl<C> IdleConnections<C> {
    fn new(capacity: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::new()),
            capacity,
        }
    }

    fn take(&self) -> Option<C> {
        self.idle.lock().pop()
    }

    /// Keep `conn` for later; returns `false` when the pool is full and it was dropped.
    fn put(&self, conn: C) -> bool {
        let mut idle = self.idle.lock();
        if idle.len() >= self.capacity {
            return false;
        }
        idle.push(conn);
        true
    }
}

/// Source of exclusive connections for `WATCH` and `BLMOVE`.
#[derive(Clone)]
struct ConnectionPool {
    client: redis::Client,
    idle: Arc<IdleConnections<MultiplexedConnection>>,
}

impl ConnectionPool {
    async fn checkout(&self) -> StoreResult<MultiplexedConnection> {
        let reused = self.idle.take();
        match reused {
            Some(conn) => Ok(conn),
            None => Ok(self.client.get_multiplexed_async_connection().await?),
        }
    }

    /// Only connections whose last command succeeded come back.
    fn checkin(&self, conn: MultiplexedConnection) {
        self.idle.put(conn);
    }
}

/// Redis-backed [`Store`].
#[derive(Clone)]
pub struct RedisStore {
    conn: MultiplexedConnection,
    pool: ConnectionPool,
}

impl RedisStore {
    /// Connect to the server at `url` (`redis://` or `rediss://`).
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        debug!("Connected to redis at {}", url);
        Ok(Self {
            conn,
            pool: ConnectionPool {
                client,
                idle: Arc::new(IdleConnections::new(MAX_IDLE_CONNECTIONS)),
            },
        })
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn exec(&self, batch: Batch) -> StoreResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let _: redis::Value = transaction(&batch).query_async(&mut conn).await?;
        Ok(())
    }

    async fn watch(&self, keys: &[String]) -> StoreResult<Box<dyn WatchSession>> {
        let mut conn = self.pool.checkout().await?;
        let _: () = redis::cmd("WATCH").arg(keys).query_async(&mut conn).await?;
        Ok(Box::new(RedisWatch {
            conn: Some(conn),
            pool: self.pool.clone(),
        }))
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn mget(&self, keys: &[String]) -> StoreResult<Vec<Option<String>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let values: Vec<Option<String>> = redis::cmd("MGET").arg(keys).query_async(&mut conn).await?;
        Ok(values)
    }

    async fn hget(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("HGET")
            .arg(key)
            .arg(field)
            .query_async(&mut conn)
            .await?;
        Ok(value)
    }

    async fn hmget(&self, key: &str, fields: &[&str]) -> StoreResult<Vec<Option<String>>> {
        if fields.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let values: Vec<Option<String>> = redis::cmd("HMGET")
            .arg(key)
            .arg(fields)
            .query_async(&mut conn)
            .await?;
        Ok(values)
    }

    async fn hgetall(&self, key: &str) -> StoreResult<BTreeMap<String, String>> {
        let mut conn = self.conn.clone();
        let values: BTreeMap<String, String> =
            redis::cmd("HGETALL").arg(key).query_async(&mut conn).await?;
        Ok(values)
    }

    async fn smembers(&self, key: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = redis::cmd("SMEMBERS").arg(key).query_async(&mut conn).await?;
        Ok(members)
    }

    async fn scard(&self, key: &str) -> StoreResult<u64> {
        let mut conn = self.conn.clone();
        let count: u64 = redis::cmd("SCARD").arg(key).query_async(&mut conn).await?;
        Ok(count)
    }

    async fn llen(&self, key: &str) -> StoreResult<u64> {
        let mut conn = self.conn.clone();
        let count: u64 = redis::cmd("LLEN").arg(key).query_async(&mut conn).await?;
        Ok(count)
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> StoreResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let items: Vec<String> = redis::cmd("LRANGE")
            .arg(key)
            .arg(start)
            .arg(stop)
            .query_async(&mut conn)
            .await?;
        Ok(items)
    }

    async fn zcard(&self, key: &str) -> StoreResult<u64> {
        let mut conn = self.conn.clone();
        let count: u64 = redis::cmd("ZCARD").arg(key).query_async(&mut conn).await?;
        Ok(count)
    }

    async fn zscore(&self, key: &str, member: &str) -> StoreResult<Option<f64>> {
        let mut conn = self.conn.clone();
        let score: Option<f64> = redis::cmd("ZSCORE")
            .arg(key)
            .arg(member)
            .query_async(&mut conn)
            .await?;
        Ok(score)
    }

    async fn zrange_with_scores(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> StoreResult<Vec<(String, f64)>> {
        let mut conn = self.conn.clone();
        let members: Vec<(String, f64)> = redis::cmd("ZRANGE")
            .arg(key)
            .arg(start)
            .arg(stop)
            .arg("WITHSCORES")
            .query_async(&mut conn)
            .await?;
        Ok(members)
    }

    async fn zrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: Option<usize>,
    ) -> StoreResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = zrange_by_score_cmd(key, min, max, limit)
            .query_async(&mut conn)
            .await?;
        Ok(members)
    }

    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        let mut conn = self.conn.clone();
        // -2: missing key, -1: no expiry.
        let millis: i64 = redis::cmd("PTTL").arg(key).query_async(&mut conn).await?;
        Ok((millis >= 0).then(|| Duration::from_millis(millis as u64)))
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("HSET")
            .arg(key)
            .arg(field)
            .arg(value)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn lrem(&self, key: &str, count: isize, value: &str) -> StoreResult<u64> {
        let mut conn = self.conn.clone();
        let removed: u64 = redis::cmd("LREM")
            .arg(key)
            .arg(count)
            .arg(value)
            .query_async(&mut conn)
            .await?;
        Ok(removed)
    }

    async fn move_item(&self, source: &str, destination: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn.clone();
        let item: Option<String> = redis::cmd("LMOVE")
            .arg(source)
            .arg(destination)
            .arg("LEFT")
            .arg("RIGHT")
            .query_async(&mut conn)
            .await?;
        Ok(item)
    }

    async fn blocking_move_item(
        &self,
        source: &str,
        destination: &str,
        timeout: Duration,
    ) -> StoreResult<Option<String>> {
        let mut conn = self.pool.checkout().await?;
        let item: Option<String> = redis::cmd("BLMOVE")
            .arg(source)
            .arg(destination)
            .arg("LEFT")
            .arg("RIGHT")
            .arg(timeout.as_secs_f64())
            .query_async(&mut conn)
            .await?;
        self.pool.checkin(conn);
        Ok(item)
    }
}

/// A connection that is dropped, not pooled, if the session is abandoned
/// while the `WATCH` is still active.
struct RedisWatch {
    conn: Option<MultiplexedConnection>,
    pool: ConnectionPool,
}

impl RedisWatch {
    fn conn(&mut self) -> StoreResult<&mut MultiplexedConnection> {
        self.conn
            .as_mut()
            .ok_or_else(|| StoreError::Malformed("watch session already closed".to_string()))
    }
}

#[async_trait]
impl WatchSession for RedisWatch {
    async fn zrange_by_score(
        &mut self,
        key: &str,
        min: f64,
        max: f64,
        limit: Option<usize>,
    ) -> StoreResult<Vec<String>> {
        let members: Vec<String> = zrange_by_score_cmd(key, min, max, limit)
            .query_async(self.conn()?)
            .await?;
        Ok(members)
    }

    async fn hget(&mut self, key: &str, field: &str) -> StoreResult<Option<String>> {
        let value: Option<String> = redis::cmd("HGET")
            .arg(key)
            .arg(field)
            .query_async(self.conn()?)
            .await?;
        Ok(value)
    }

    async fn hexists(&mut self, key: &str, field: &str) -> StoreResult<bool> {
        let exists: bool = redis::cmd("HEXISTS")
            .arg(key)
            .arg(field)
            .query_async(self.conn()?)
            .await?;
        Ok(exists)
    }

    async fn zscore(&mut self, key: &str, member: &str) -> StoreResult<Option<f64>> {
        let score: Option<f64> = redis::cmd("ZSCORE")
            .arg(key)
            .arg(member)
            .query_async(self.conn()?)
            .await?;
        Ok(score)
    }

    async fn commit(&mut self, batch: Batch) -> StoreResult<bool> {
        let mut conn = self
            .conn
            .take()
            .ok_or_else(|| StoreError::Malformed("watch session already closed".to_string()))?;
        // EXEC replies nil when a watched key changed.
        let reply: Option<Vec<redis::Value>> = transaction(&batch).query_async(&mut conn).await?;
        self.pool.checkin(conn);
        Ok(reply.is_some())
    }

    async fn unwatch(&mut self) -> StoreResult<()> {
        let Some(mut conn) = self.conn.take() else {
            return Ok(());
        };
        let _: () = redis::cmd("UNWATCH").query_async(&mut conn).await?;
        self.pool.checkin(conn);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_connections_capped() {
        let idle = IdleConnections::new(2);
        assert!(idle.put(1));
        assert!(idle.put(2));
        assert!(!idle.put(3));

        assert_eq!(idle.take(), Some(2));
        assert_eq!(idle.take(), Some(1));
        assert_eq!(idle.take(), None);
    }

    #[test]
    fn test_error_classification() {
        let io = redis::RedisError::from(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset",
        ));
        assert!(StoreError::from(io).is_retryable());

        let wrong_type = redis::RedisError::from((
            redis::ErrorKind::TypeError,
            "WRONGTYPE",
        ));
        assert!(StoreError::from(wrong_type).is_fatal());
    }
}
