//! Redis-backed key-value store.
//!
//! Shares counters, cached feed pages and rate-limit windows across service
//! instances. Conditional operations run as Lua scripts so each one stays a
//! single atomic round-trip.

use super::{KvStore, PatternSet};
use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use std::fmt;
use std::time::Duration;

const INCR_IF_EXISTS: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
    return redis.call('INCRBY', KEYS[1], ARGV[1])
end
return false
"#;

const INCR_WINDOW: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return count
"#;

/// Keys fetched per SCAN step in `delete_matching`
const SCAN_COUNT: usize = 500;

pub struct RedisKvStore {
    connection: ConnectionManager,
    incr_if_exists: Script,
    incr_window: Script,
}

impl fmt::Debug for RedisKvStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisKvStore").finish_non_exhaustive()
    }
}

impl RedisKvStore {
    /// Connect to Redis.
    ///
    /// # Arguments
    /// * `url` - Redis connection URL (e.g., "redis://127.0.0.1/")
    pub async fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url).context("Invalid Redis URL")?;
        let connection = ConnectionManager::new(client)
            .await
            .context("Failed to connect to Redis")?;

        Ok(Self {
            connection,
            incr_if_exists: Script::new(INCR_IF_EXISTS),
            incr_window: Script::new(INCR_WINDOW),
        })
    }

    fn conn(&self) -> ConnectionManager {
        self.connection.clone()
    }
}

#[async_trait]
impl KvStore for RedisKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn();
        let value: Option<String> = conn.get(key).await.context("Redis GET failed")?;
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl.as_millis().max(1) as u64)
            .query_async(&mut conn)
            .await
            .context("Redis SET failed")?;
        Ok(())
    }

    async fn incr_if_exists(&self, key: &str, delta: i64) -> Result<Option<i64>> {
        let mut conn = self.conn();
        let value: Option<i64> = self
            .incr_if_exists
            .key(key)
            .arg(delta)
            .invoke_async(&mut conn)
            .await
            .context("Redis conditional INCRBY failed")?;
        Ok(value)
    }

    async fn incr_window(&self, key: &str, window: Duration) -> Result<i64> {
        let mut conn = self.conn();
        let count: i64 = self
            .incr_window
            .key(key)
            .arg(window.as_millis().max(1) as u64)
            .invoke_async(&mut conn)
            .await
            .context("Redis window INCR failed")?;
        Ok(count)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let mut conn = self.conn();
        let millis: i64 = conn.pttl(key).await.context("Redis PTTL failed")?;
        // -2: no key, -1: no expiry
        Ok((millis >= 0).then(|| Duration::from_millis(millis as u64)))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn();
        let removed: u64 = conn.del(key).await.context("Redis DEL failed")?;
        Ok(removed > 0)
    }

    /// Exact keys go straight to `DEL`. All wildcard patterns share a single
    /// `SCAN` over their common literal prefix, filtered locally, so the
    /// keyspace is swept once per call however many patterns there are.
    async fn delete_matching(&self, patterns: &[String]) -> Result<u64> {
        let set = PatternSet::new(patterns);
        if set.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn();
        let mut removed = 0u64;

        let exact: Vec<String> = set.exact_keys().cloned().collect();
        if !exact.is_empty() {
            let n: u64 = conn.del(&exact).await.context("Redis DEL failed")?;
            removed += n;
        }

        let Some(scan_match) = set.scan_pattern() else {
            return Ok(removed);
        };

        let mut cursor = 0u64;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&scan_match)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await
                .context("Redis SCAN failed")?;

            let hits: Vec<String> = keys.into_iter().filter(|k| set.matches(k)).collect();
            if !hits.is_empty() {
                let n: u64 = conn.del(&hits).await.context("Redis DEL failed")?;
                removed += n;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(removed)
    }
}
