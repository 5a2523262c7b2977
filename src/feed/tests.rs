use super::*;
use crate::cache::{KvStore, MemoryKvStore};
use crate::db::Database;
use anyhow::anyhow;
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct FixedSubscribers(Vec<Uuid>);

impl SubscriberSource for FixedSubscribers {
    fn subscribers_of(&self, _creator_id: Uuid) -> Result<Vec<Uuid>> {
        Ok(self.0.clone())
    }
}

struct BrokenSubscribers;

impl SubscriberSource for BrokenSubscribers {
    fn subscribers_of(&self, _creator_id: Uuid) -> Result<Vec<Uuid>> {
        Err(anyhow!("follows table unavailable"))
    }
}

/// Records batch sizes; fails the batch with the given index.
#[derive(Default)]
struct RecordingFeed {
    batches: Mutex<Vec<usize>>,
    fail_batch: Option<usize>,
}

impl FeedRepository for RecordingFeed {
    fn insert_batch(
        &self,
        _post_id: Uuid,
        _created_at: DateTime<Utc>,
        user_ids: &[Uuid],
    ) -> Result<usize, FeedWriteError> {
        let mut batches = self.batches.lock().unwrap();
        let index = batches.len();
        batches.push(user_ids.len());
        if self.fail_batch == Some(index) {
            return Err(FeedWriteError::Other(anyhow!("disk full")));
        }
        Ok(user_ids.len())
    }

    fn delete_by_post(&self, _post_id: Uuid) -> Result<Vec<Uuid>> {
        Ok(Vec::new())
    }

    fn delete_older_than(&self, _cutoff: DateTime<Utc>, _limit: usize) -> Result<usize> {
        Ok(0)
    }

    fn list_for_user(&self, _user_id: Uuid, _offset: usize, _limit: usize) -> Result<Vec<FeedEntry>> {
        Ok(Vec::new())
    }
}

/// Memory store that records every `delete_matching` call.
#[derive(Default)]
struct CountingStore {
    inner: MemoryKvStore,
    invalidations: Mutex<Vec<Vec<String>>>,
}

#[async_trait::async_trait]
impl KvStore for CountingStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.inner.get(key).await
    }
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.inner.set_ex(key, value, ttl).await
    }
    async fn incr_if_exists(&self, key: &str, delta: i64) -> Result<Option<i64>> {
        self.inner.incr_if_exists(key, delta).await
    }
    async fn incr_window(&self, key: &str, window: Duration) -> Result<i64> {
        self.inner.incr_window(key, window).await
    }
    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        self.inner.ttl(key).await
    }
    async fn delete(&self, key: &str) -> Result<bool> {
        self.inner.delete(key).await
    }
    async fn delete_matching(&self, patterns: &[String]) -> Result<u64> {
        self.invalidations.lock().unwrap().push(patterns.to_vec());
        self.inner.delete_matching(patterns).await
    }
}

fn users(n: usize) -> Vec<Uuid> {
    (0..n).map(|_| Uuid::now_v7()).collect()
}

fn sqlite_feed() -> Arc<FeedStore> {
    Arc::new(FeedStore::new(Arc::new(Database::in_memory().unwrap())))
}

#[tokio::test]
async fn test_fanout_batches_and_single_invalidation() {
    let subscribers = users(120);
    let feed = Arc::new(RecordingFeed::default());
    let store = Arc::new(CountingStore::default());
    let pages = FeedPageCache::new(store.clone(), Duration::from_secs(300));
    let distributor = FanoutDistributor::new(
        Arc::new(FixedSubscribers(subscribers.clone())),
        feed.clone(),
        pages,
        50,
    );

    let report = distributor
        .distribute(Uuid::now_v7(), Uuid::now_v7(), Utc::now())
        .await
        .unwrap();

    assert_eq!(*feed.batches.lock().unwrap(), vec![50, 50, 20]);
    assert_eq!(report.batches, 3);
    assert_eq!(report.written, 120);

    let invalidations = store.invalidations.lock().unwrap();
    assert_eq!(invalidations.len(), 1);
    assert_eq!(invalidations[0].len(), 120);
    for id in &subscribers {
        assert!(invalidations[0].contains(&FeedPageCache::user_pattern(*id)));
    }
}

#[tokio::test]
async fn test_failed_batch_does_not_stop_fanout() {
    let feed = Arc::new(RecordingFeed {
        fail_batch: Some(0),
        ..Default::default()
    });
    let store = Arc::new(CountingStore::default());
    let distributor = FanoutDistributor::new(
        Arc::new(FixedSubscribers(users(75))),
        feed.clone(),
        FeedPageCache::new(store.clone(), Duration::from_secs(300)),
        50,
    );

    let report = distributor
        .distribute(Uuid::now_v7(), Uuid::now_v7(), Utc::now())
        .await
        .unwrap();

    assert_eq!(report.failed_batches, 1);
    assert_eq!(report.written, 25);
    assert_eq!(store.invalidations.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_subscriber_load_failure_is_an_error() {
    let store = Arc::new(CountingStore::default());
    let distributor = FanoutDistributor::new(
        Arc::new(BrokenSubscribers),
        Arc::new(RecordingFeed::default()),
        FeedPageCache::new(store.clone(), Duration::from_secs(300)),
        50,
    );

    let result = distributor
        .distribute(Uuid::now_v7(), Uuid::now_v7(), Utc::now())
        .await;
    assert!(result.is_err());
    assert!(store.invalidations.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_no_subscribers_skips_invalidation() {
    let store = Arc::new(CountingStore::default());
    let distributor = FanoutDistributor::new(
        Arc::new(FixedSubscribers(Vec::new())),
        Arc::new(RecordingFeed::default()),
        FeedPageCache::new(store.clone(), Duration::from_secs(300)),
        50,
    );

    let report = distributor
        .distribute(Uuid::now_v7(), Uuid::now_v7(), Utc::now())
        .await
        .unwrap();
    assert_eq!(report, FanoutReport::default());
    assert!(store.invalidations.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_redelivery_is_idempotent() {
    let feed = sqlite_feed();
    let subscribers = users(120);
    let distributor = FanoutDistributor::new(
        Arc::new(FixedSubscribers(subscribers)),
        feed.clone(),
        FeedPageCache::new(Arc::new(MemoryKvStore::new()), Duration::from_secs(300)),
        50,
    );
    let post_id = Uuid::now_v7();
    let created_at = Utc::now();

    let first = distributor.distribute(Uuid::now_v7(), post_id, created_at).await.unwrap();
    assert_eq!(first.written, 120);

    let second = distributor.distribute(Uuid::now_v7(), post_id, created_at).await.unwrap();
    assert_eq!(second.written, 0);
    assert_eq!(second.duplicate_batches, 3);
    assert_eq!(feed.count_for_post(post_id).unwrap(), 120);
}

#[test]
fn test_duplicate_batch_writes_nothing() {
    let feed = sqlite_feed();
    let post_id = Uuid::now_v7();
    let existing = Uuid::now_v7();
    feed.insert_batch(post_id, Utc::now(), &[existing]).unwrap();

    let batch = vec![Uuid::now_v7(), existing, Uuid::now_v7()];
    let result = feed.insert_batch(post_id, Utc::now(), &batch);

    assert!(matches!(result, Err(FeedWriteError::Duplicate)));
    assert_eq!(feed.count_for_post(post_id).unwrap(), 1);
}

#[tokio::test]
async fn test_remove_by_entity_clears_feeds_and_pages() {
    let feed = sqlite_feed();
    let kv = Arc::new(MemoryKvStore::new());
    let pages = FeedPageCache::new(kv.clone(), Duration::from_secs(300));
    let followers = users(3);
    let distributor = FanoutDistributor::new(
        Arc::new(FixedSubscribers(followers.clone())),
        feed.clone(),
        pages.clone(),
        50,
    );
    let post_id = Uuid::now_v7();
    distributor.distribute(Uuid::now_v7(), post_id, Utc::now()).await.unwrap();

    let reader = FeedReader::new(feed.clone(), pages, 20);
    assert_eq!(reader.page(followers[0], 0).await.unwrap().len(), 1);
    assert!(!kv.is_empty());

    let removed = distributor.remove_by_entity(post_id).await.unwrap();
    assert_eq!(removed, 3);
    assert_eq!(feed.count_for_post(post_id).unwrap(), 0);
    assert!(kv.is_empty());
    assert!(reader.page(followers[0], 0).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_reader_serves_cached_page() {
    let feed = sqlite_feed();
    let kv = Arc::new(MemoryKvStore::new());
    let reader = FeedReader::new(
        feed.clone(),
        FeedPageCache::new(kv.clone(), Duration::from_secs(300)),
        2,
    );
    let user = Uuid::now_v7();
    let base = Utc::now();
    for offset in 0..3 {
        feed.insert_batch(Uuid::now_v7(), base + chrono::Duration::seconds(offset), &[user])
            .unwrap();
    }

    let first = reader.page(user, 0).await.unwrap();
    assert_eq!(first.len(), 2);
    assert!(first[0].created_at > first[1].created_at);
    assert_eq!(reader.page(user, 1).await.unwrap().len(), 1);

    // A new row is invisible until the page is invalidated
    feed.insert_batch(Uuid::now_v7(), base + chrono::Duration::seconds(10), &[user])
        .unwrap();
    assert_eq!(reader.page(user, 0).await.unwrap(), first);
    assert!(kv
        .get(&FeedPageCache::page_key(user, 0))
        .await
        .unwrap()
        .is_some());
}

#[test]
fn test_janitor_deletes_in_batches() {
    let feed = sqlite_feed();
    let old = Utc::now() - chrono::Duration::days(8);
    let fresh = Utc::now();
    for _ in 0..5 {
        feed.insert_batch(Uuid::now_v7(), old, &users(1)).unwrap();
    }
    let keep = Uuid::now_v7();
    feed.insert_batch(keep, fresh, &users(1)).unwrap();

    let janitor = FeedJanitor::new(
        feed.clone(),
        &JanitorConfig {
            batch_size: 2,
            ..Default::default()
        },
    );

    assert_eq!(janitor.run_once().unwrap(), 5);
    assert_eq!(feed.count_for_post(keep).unwrap(), 1);
    assert_eq!(janitor.run_once().unwrap(), 0);
}
