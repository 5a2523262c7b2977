use super::KvStore;
use anyhow::Result;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Aggregates kept in the counter cache
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CounterKey {
    PostLikes(Uuid),
    PostComments(Uuid),
    UserFollowers(Uuid),
    UserFollowing(Uuid),
    UserPosts(Uuid),
}

impl CounterKey {
    /// Store key, e.g. `count:post:<id>:likes`
    pub fn key(&self) -> String {
        match self {
            CounterKey::PostLikes(id) => format!("count:post:{}:likes", id),
            CounterKey::PostComments(id) => format!("count:post:{}:comments", id),
            CounterKey::UserFollowers(id) => format!("count:user:{}:followers", id),
            CounterKey::UserFollowing(id) => format!("count:user:{}:following", id),
            CounterKey::UserPosts(id) => format!("count:user:{}:posts", id),
        }
    }
}

impl fmt::Display for CounterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// Authoritative count query against the system of record
pub trait CountSource: Send + Sync {
    fn count(&self, key: &CounterKey) -> Result<i64>;
}

/// Approximate counters shadowing the system of record.
///
/// Misses are filled by a loader and cached for a fixed TTL. Increments and
/// decrements only touch values already cached; an absent key stays absent
/// until the next read repopulates it. An increment racing a TTL expiry can
/// be lost; the next reload corrects it.
#[derive(Clone)]
pub struct CounterCache {
    store: Arc<dyn KvStore>,
    ttl: Duration,
}

impl CounterCache {
    pub const DEFAULT_TTL: Duration = Duration::from_secs(10 * 60);

    pub fn new(store: Arc<dyn KvStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cached value, `None` on miss.
    ///
    /// A value that is not an integer counts as a miss.
    pub async fn get(&self, key: &CounterKey) -> Result<Option<i64>> {
        let raw = self.store.get(&key.key()).await?;
        Ok(raw.and_then(|v| match v.parse::<i64>() {
            Ok(n) => Some(n),
            Err(_) => {
                warn!(key = %key, value = %v, "Ignoring non-integer cached counter");
                None
            }
        }))
    }

    /// Returns the cached value or loads, caches and returns it.
    ///
    /// Fails only when the loader fails; a store outage degrades to calling
    /// the loader on every read.
    pub async fn read_through<F>(&self, key: &CounterKey, loader: F) -> Result<i64>
    where
        F: FnOnce() -> Result<i64>,
    {
        match self.get(key).await {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => {}
            Err(e) => warn!(key = %key, error = %e, "Counter cache read failed, using source"),
        }

        let value = loader()?;
        debug!(key = %key, value, "Counter cache miss filled");

        if let Err(e) = self
            .store
            .set_ex(&key.key(), &value.to_string(), self.ttl)
            .await
        {
            warn!(key = %key, error = %e, "Failed to cache counter");
        }
        Ok(value)
    }

    /// `read_through` with a `CountSource` as the loader.
    pub async fn count(&self, key: &CounterKey, source: &dyn CountSource) -> Result<i64> {
        self.read_through(key, || source.count(key)).await
    }

    /// Adds one to a cached counter. No-op on miss. Returns the new value if cached.
    pub async fn increment(&self, key: &CounterKey) -> Option<i64> {
        self.adjust(key, 1).await
    }

    /// Subtracts one from a cached counter. No-op on miss.
    pub async fn decrement(&self, key: &CounterKey) -> Option<i64> {
        self.adjust(key, -1).await
    }

    /// Drops a cached counter so the next read reloads it.
    pub async fn invalidate(&self, key: &CounterKey) {
        if let Err(e) = self.store.delete(&key.key()).await {
            warn!(key = %key, error = %e, "Failed to invalidate counter");
        }
    }

    async fn adjust(&self, key: &CounterKey, delta: i64) -> Option<i64> {
        match self.store.incr_if_exists(&key.key(), delta).await {
            Ok(value) => value,
            Err(e) => {
                warn!(key = %key, delta, error = %e, "Counter adjust failed, dropping cached value");
                // Leaves the key to be rebuilt from the source on next read
                self.invalidate(key).await;
                None
            }
        }
    }
}
