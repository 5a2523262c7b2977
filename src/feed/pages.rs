use super::{FeedEntry, FeedRepository};
use crate::cache::KvStore;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Cached feed pages, keyed `feed:<user>:page:<n>`.
#[derive(Clone)]
pub struct FeedPageCache {
    store: Arc<dyn KvStore>,
    ttl: Duration,
}

impl FeedPageCache {
    pub fn new(store: Arc<dyn KvStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn page_key(user_id: Uuid, page: usize) -> String {
        format!("feed:{}:page:{}", user_id, page)
    }

    /// Pattern covering every cached page of one user
    pub fn user_pattern(user_id: Uuid) -> String {
        format!("feed:{}:*", user_id)
    }

    pub async fn get(&self, user_id: Uuid, page: usize) -> Result<Option<Vec<FeedEntry>>> {
        let key = Self::page_key(user_id, page);
        match self.store.get(&key).await? {
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(entries) => Ok(Some(entries)),
                Err(e) => {
                    warn!(key = %key, error = %e, "Dropping undecodable feed page");
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    pub async fn put(&self, user_id: Uuid, page: usize, entries: &[FeedEntry]) -> Result<()> {
        let raw = serde_json::to_string(entries).context("Failed to encode feed page")?;
        self.store
            .set_ex(&Self::page_key(user_id, page), &raw, self.ttl)
            .await
    }

    /// Drops every cached page of every user in `user_ids` with one store call.
    ///
    /// Failures are logged; stale pages then live out their TTL.
    pub async fn invalidate(&self, user_ids: &[Uuid]) -> u64 {
        if user_ids.is_empty() {
            return 0;
        }
        let patterns: Vec<String> = user_ids.iter().map(|id| Self::user_pattern(*id)).collect();
        match self.store.delete_matching(&patterns).await {
            Ok(removed) => {
                debug!(users = user_ids.len(), removed, "Invalidated feed pages");
                removed
            }
            Err(e) => {
                warn!(users = user_ids.len(), error = %e, "Failed to invalidate feed pages");
                0
            }
        }
    }
}

/// Read path for feeds: cached pages backed by the feed repository.
pub struct FeedReader {
    feed: Arc<dyn FeedRepository>,
    pages: FeedPageCache,
    page_size: usize,
}

impl FeedReader {
    pub fn new(feed: Arc<dyn FeedRepository>, pages: FeedPageCache, page_size: usize) -> Self {
        Self {
            feed,
            pages,
            page_size: page_size.max(1),
        }
    }

    /// Page `page` (0-based) of a user's feed, newest first.
    pub async fn page(&self, user_id: Uuid, page: usize) -> Result<Vec<FeedEntry>> {
        match self.pages.get(user_id, page).await {
            Ok(Some(entries)) => return Ok(entries),
            Ok(None) => {}
            Err(e) => warn!(user_id = %user_id, page, error = %e, "Feed page cache read failed"),
        }

        let entries = self
            .feed
            .list_for_user(user_id, page * self.page_size, self.page_size)
            .with_context(|| format!("Failed to load feed page {} for {}", page, user_id))?;

        if let Err(e) = self.pages.put(user_id, page, &entries).await {
            warn!(user_id = %user_id, page, error = %e, "Failed to cache feed page");
        }
        Ok(entries)
    }
}
