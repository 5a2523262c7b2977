use super::{KvStore, PatternSet};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info};

struct Slot {
    value: String,
    expires_at: Option<Instant>,
}

impl Slot {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map_or(false, |at| at <= now)
    }
}

/// In-process key-value store.
///
/// Each operation holds the shard lock of its key for the whole
/// read-modify-write, which makes it atomic the same way a single Redis
/// command is. Expired keys are dropped on access and by `purge_expired`,
/// which the purge loop runs periodically. Time comes from `tokio::time`, so
/// tests can pause and advance the clock.
#[derive(Default)]
pub struct MemoryKvStore {
    slots: DashMap<String, Slot>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.slots.iter().filter(|s| !s.is_expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every expired key; returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.slots.len();
        self.slots.retain(|_, slot| !slot.is_expired(now));
        before.saturating_sub(self.slots.len())
    }

    /// Run background purge loop
    ///
    /// This function runs indefinitely until the task is cancelled.
    pub async fn run_purge_loop(self: Arc<Self>, every: Duration) {
        info!(interval_ms = every.as_millis() as u64, "Starting memory store purge");

        let mut timer = interval(every);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            timer.tick().await;
            let purged = self.purge_expired();
            if purged > 0 {
                debug!(purged, remaining = self.slots.len(), "Purged expired keys");
            }
        }
    }

    fn parse_counter(key: &str, value: &str) -> Result<i64> {
        value
            .parse::<i64>()
            .map_err(|_| anyhow!("value at '{}' is not an integer", key))
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        let expired = match self.slots.get(key) {
            Some(slot) if !slot.is_expired(now) => return Ok(Some(slot.value.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.slots.remove_if(key, |_, slot| slot.is_expired(now));
        }
        Ok(None)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.slots.insert(
            key.to_string(),
            Slot {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn incr_if_exists(&self, key: &str, delta: i64) -> Result<Option<i64>> {
        let now = Instant::now();
        match self.slots.entry(key.to_string()) {
            Entry::Occupied(entry) if entry.get().is_expired(now) => {
                entry.remove();
                Ok(None)
            }
            Entry::Occupied(mut entry) => {
                let slot = entry.get_mut();
                let next = Self::parse_counter(key, &slot.value)? + delta;
                slot.value = next.to_string();
                Ok(Some(next))
            }
            Entry::Vacant(_) => Ok(None),
        }
    }

    async fn incr_window(&self, key: &str, window: Duration) -> Result<i64> {
        let now = Instant::now();
        match self.slots.entry(key.to_string()) {
            Entry::Occupied(mut entry) if !entry.get().is_expired(now) => {
                let slot = entry.get_mut();
                let next = Self::parse_counter(key, &slot.value)? + 1;
                slot.value = next.to_string();
                Ok(next)
            }
            Entry::Occupied(mut entry) => {
                // Expired window: behaves as if the key did not exist
                entry.insert(Slot {
                    value: "1".to_string(),
                    expires_at: Some(now + window),
                });
                Ok(1)
            }
            Entry::Vacant(entry) => {
                entry.insert(Slot {
                    value: "1".to_string(),
                    expires_at: Some(now + window),
                });
                Ok(1)
            }
        }
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let now = Instant::now();
        Ok(self.slots.get(key).and_then(|slot| match slot.expires_at {
            Some(at) if at > now => Some(at - now),
            _ => None,
        }))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let now = Instant::now();
        Ok(self
            .slots
            .remove(key)
            .map_or(false, |(_, slot)| !slot.is_expired(now)))
    }

    async fn delete_matching(&self, patterns: &[String]) -> Result<u64> {
        let set = PatternSet::new(patterns);
        if set.is_empty() {
            return Ok(0);
        }
        let now = Instant::now();
        let mut removed = 0u64;
        self.slots.retain(|key, slot| {
            let hit = set.matches(key);
            if hit && !slot.is_expired(now) {
                removed += 1;
            }
            !hit
        });
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_and_expire() {
        tokio::time::pause();
        let store = MemoryKvStore::new();

        store.set_ex("k", "v", Duration::from_secs(10)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));
        assert_eq!(store.ttl("k").await.unwrap(), Some(Duration::from_secs(10)));

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_incr_if_exists_never_creates() {
        let store = MemoryKvStore::new();

        assert_eq!(store.incr_if_exists("c", 1).await.unwrap(), None);
        assert_eq!(store.get("c").await.unwrap(), None);

        store.set_ex("c", "5", Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.incr_if_exists("c", 1).await.unwrap(), Some(6));
        assert_eq!(store.incr_if_exists("c", -2).await.unwrap(), Some(4));
    }

    #[tokio::test]
    async fn test_incr_if_exists_keeps_ttl() {
        tokio::time::pause();
        let store = MemoryKvStore::new();
        store.set_ex("c", "1", Duration::from_secs(60)).await.unwrap();

        tokio::time::advance(Duration::from_secs(20)).await;
        store.incr_if_exists("c", 1).await.unwrap();

        assert_eq!(store.ttl("c").await.unwrap(), Some(Duration::from_secs(40)));
    }

    #[tokio::test]
    async fn test_incr_if_exists_rejects_non_integer() {
        let store = MemoryKvStore::new();
        store.set_ex("c", "abc", Duration::from_secs(60)).await.unwrap();
        assert!(store.incr_if_exists("c", 1).await.is_err());
    }

    #[tokio::test]
    async fn test_incr_window_sets_ttl_only_on_first_hit() {
        tokio::time::pause();
        let store = MemoryKvStore::new();
        let window = Duration::from_secs(30);

        assert_eq!(store.incr_window("r", window).await.unwrap(), 1);
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(store.incr_window("r", window).await.unwrap(), 2);

        // Still the original window, not refreshed by the second hit
        assert_eq!(store.ttl("r").await.unwrap(), Some(Duration::from_secs(20)));

        tokio::time::advance(Duration::from_secs(20)).await;
        assert_eq!(store.incr_window("r", window).await.unwrap(), 1);
        assert_eq!(store.ttl("r").await.unwrap(), Some(window));
    }

    #[tokio::test]
    async fn test_delete_matching() {
        let store = MemoryKvStore::new();
        let ttl = Duration::from_secs(60);
        store.set_ex("feed:a:page:0", "[]", ttl).await.unwrap();
        store.set_ex("feed:a:page:1", "[]", ttl).await.unwrap();
        store.set_ex("feed:b:page:0", "[]", ttl).await.unwrap();
        store.set_ex("count:post:x:likes", "3", ttl).await.unwrap();

        let removed = store
            .delete_matching(&["feed:a:*".to_string(), "feed:b:*".to_string()])
            .await
            .unwrap();

        assert_eq!(removed, 3);
        assert_eq!(store.len(), 1);
        assert!(store.get("count:post:x:likes").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_purge_drops_keys_never_touched_again() {
        tokio::time::pause();
        let store = MemoryKvStore::new();
        let window = Duration::from_secs(60);
        for i in 0..1_000 {
            store.incr_window(&format!("rate:post:u{}", i), window).await.unwrap();
        }
        store.set_ex("feed:a:page:0", "[]", Duration::from_secs(3600)).await.unwrap();

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(store.slots.len(), 1_001);
        assert_eq!(store.purge_expired(), 1_000);
        assert_eq!(store.slots.len(), 1);
        assert!(store.get("feed:a:page:0").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_purge_loop_runs_on_interval() {
        tokio::time::pause();
        let store = Arc::new(MemoryKvStore::new());
        store.set_ex("k", "v", Duration::from_secs(5)).await.unwrap();

        let task = tokio::spawn(store.clone().run_purge_loop(Duration::from_secs(30)));
        tokio::time::sleep(Duration::from_secs(31)).await;

        assert_eq!(store.slots.len(), 0);
        task.abort();
    }

    #[tokio::test]
    async fn test_delete() {
        let store = MemoryKvStore::new();
        store.set_ex("k", "v", Duration::from_secs(60)).await.unwrap();
        assert!(store.delete("k").await.unwrap());
        assert!(!store.delete("k").await.unwrap());
    }
}
