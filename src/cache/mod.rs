//! Shared key-value store port plus the approximate counter cache built on it.
//!
//! The store is never a source of truth. Everything cached here can be
//! rebuilt from the relational store.

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;

mod counter;
mod memory;
#[cfg(feature = "redis-store")]
mod redis_store;

pub use counter::{CountSource, CounterCache, CounterKey};
pub use memory::MemoryKvStore;
#[cfg(feature = "redis-store")]
pub use redis_store::RedisKvStore;

/// String key → string value store with TTLs and atomic counters.
///
/// Every method is a single round-trip and atomic at the store.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Sets `key` to `value`, replacing any previous value and TTL.
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Adds `delta` to an existing integer value, keeping its TTL.
    ///
    /// Returns `None` without creating anything when the key is absent.
    async fn incr_if_exists(&self, key: &str, delta: i64) -> Result<Option<i64>>;

    /// Increments a window counter; when the result is 1 the key also gets
    /// `window` as its TTL. Increment and expiry are one atomic step.
    async fn incr_window(&self, key: &str, window: Duration) -> Result<i64>;

    /// Remaining TTL, `None` if the key is absent or has no expiry.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>>;

    async fn delete(&self, key: &str) -> Result<bool>;

    /// Deletes every key matching any of the glob `patterns` (`*` wildcard).
    /// Returns the number of keys removed.
    async fn delete_matching(&self, patterns: &[String]) -> Result<u64>;
}

/// Which key-value backend to use
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheBackend {
    /// Process-local store; fine for a single instance and tests
    #[default]
    Memory,
    /// Shared Redis (requires the `redis-store` feature)
    Redis,
}

/// Key-value store configuration
#[derive(Clone, Debug, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub backend: CacheBackend,
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    /// Seconds between sweeps of expired keys in the memory store
    #[serde(default = "default_purge_interval_seconds")]
    pub purge_interval_seconds: u64,
}

fn default_purge_interval_seconds() -> u64 {
    60
}

fn default_redis_url() -> String {
    std::env::var("RIPPLE_REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::default(),
            redis_url: default_redis_url(),
            purge_interval_seconds: default_purge_interval_seconds(),
        }
    }
}

/// Glob match with `*` as the only wildcard (the subset of Redis `MATCH`
/// syntax this crate emits).
pub fn glob_match(pattern: &str, key: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == key;
    }

    let first = parts[0];
    let last = parts[parts.len() - 1];
    if !key.starts_with(first) || key.len() < first.len() + last.len() {
        return false;
    }

    let mut rest = &key[first.len()..];
    for part in &parts[1..parts.len() - 1] {
        match rest.find(part) {
            Some(pos) => rest = &rest[pos + part.len()..],
            None => return false,
        }
    }
    rest.ends_with(last)
}

/// A batch of `delete_matching` patterns, classified once so that matching a
/// key does not walk every pattern.
///
/// Patterns without `*` are exact keys; patterns whose only `*` is the last
/// character are prefixes (the `feed:<user>:*` shape); anything else falls
/// back to `glob_match`.
#[derive(Debug, Default)]
pub struct PatternSet {
    exact: HashSet<String>,
    prefixes: HashSet<String>,
    globs: Vec<String>,
    scan_prefix: Option<String>,
}

impl PatternSet {
    pub fn new(patterns: &[String]) -> Self {
        let mut set = PatternSet::default();
        for pattern in patterns {
            let Some(star) = pattern.find('*') else {
                set.exact.insert(pattern.clone());
                continue;
            };
            let literal = &pattern[..star];
            set.scan_prefix = Some(match set.scan_prefix.take() {
                None => literal.to_string(),
                Some(common) => common_prefix(&common, literal).to_string(),
            });
            if star == pattern.len() - 1 {
                set.prefixes.insert(literal.to_string());
            } else {
                set.globs.push(pattern.clone());
            }
        }
        set
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.prefixes.is_empty() && self.globs.is_empty()
    }

    pub fn matches(&self, key: &str) -> bool {
        if self.exact.contains(key) {
            return true;
        }
        if !self.prefixes.is_empty() {
            let hit = key
                .char_indices()
                .map(|(i, _)| i)
                .chain(std::iter::once(key.len()))
                .any(|i| self.prefixes.contains(&key[..i]));
            if hit {
                return true;
            }
        }
        self.globs.iter().any(|p| glob_match(p, key))
    }

    /// Keys named literally, deletable without a scan
    pub fn exact_keys(&self) -> impl Iterator<Item = &String> {
        self.exact.iter()
    }

    /// One Redis `MATCH` pattern covering every wildcard pattern, or `None`
    /// when only exact keys were given.
    pub fn scan_pattern(&self) -> Option<String> {
        self.scan_prefix.as_ref().map(|prefix| {
            let mut out = String::with_capacity(prefix.len() + 1);
            for c in prefix.chars() {
                if matches!(c, '?' | '[' | ']' | '\\') {
                    out.push('\\');
                }
                out.push(c);
            }
            out.push('*');
            out
        })
    }
}

fn common_prefix<'a>(a: &'a str, b: &str) -> &'a str {
    let end = a
        .char_indices()
        .zip(b.chars())
        .find(|((_, ca), cb)| ca != cb)
        .map_or(a.len().min(b.len()), |((i, _), _)| i);
    &a[..end]
}
