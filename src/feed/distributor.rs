use super::{FeedPageCache, FeedRepository, FeedWriteError, SubscriberSource};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Fan-out configuration
#[derive(Clone, Debug, Deserialize)]
pub struct FanoutConfig {
    /// Subscribers written per insert batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Seconds a cached feed page lives
    #[serde(default = "default_page_ttl_seconds")]
    pub page_ttl_seconds: u64,
    /// Entries per cached feed page
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn default_batch_size() -> usize {
    50
}

fn default_page_ttl_seconds() -> u64 {
    300
}

fn default_page_size() -> usize {
    20
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            page_ttl_seconds: default_page_ttl_seconds(),
            page_size: default_page_size(),
        }
    }
}

/// What one `distribute` call did
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FanoutReport {
    pub subscribers: usize,
    pub batches: usize,
    /// Rows written
    pub written: usize,
    /// Batches skipped because they held already-delivered rows
    pub duplicate_batches: usize,
    /// Batches that failed for any other reason
    pub failed_batches: usize,
}

/// Materializes new posts into follower feeds.
///
/// Safe to call more than once per post: batches that collide with rows
/// already written are skipped.
pub struct FanoutDistributor {
    subscribers: Arc<dyn SubscriberSource>,
    feed: Arc<dyn FeedRepository>,
    pages: FeedPageCache,
    batch_size: usize,
}

impl FanoutDistributor {
    pub fn new(
        subscribers: Arc<dyn SubscriberSource>,
        feed: Arc<dyn FeedRepository>,
        pages: FeedPageCache,
        batch_size: usize,
    ) -> Self {
        Self {
            subscribers,
            feed,
            pages,
            batch_size: batch_size.max(1),
        }
    }

    /// Writes `post_id` into the feed of every subscriber of `creator_id`,
    /// then invalidates their cached feed pages in one call.
    ///
    /// Only a failure to load the subscriber list is an error; batch
    /// failures are logged and counted.
    pub async fn distribute(
        &self,
        creator_id: Uuid,
        post_id: Uuid,
        created_at: DateTime<Utc>,
    ) -> Result<FanoutReport> {
        let subscribers = self
            .subscribers
            .subscribers_of(creator_id)
            .with_context(|| format!("Failed to load subscribers of {}", creator_id))?;

        let mut report = FanoutReport {
            subscribers: subscribers.len(),
            ..Default::default()
        };
        if subscribers.is_empty() {
            debug!(creator_id = %creator_id, post_id = %post_id, "No subscribers to fan out to");
            return Ok(report);
        }

        for batch in subscribers.chunks(self.batch_size) {
            report.batches += 1;
            match self.feed.insert_batch(post_id, created_at, batch) {
                Ok(written) => report.written += written,
                Err(FeedWriteError::Duplicate) => {
                    debug!(
                        post_id = %post_id,
                        batch_len = batch.len(),
                        "Feed batch already delivered, skipping"
                    );
                    report.duplicate_batches += 1;
                }
                Err(FeedWriteError::Other(e)) => {
                    error!(
                        post_id = %post_id,
                        batch_len = batch.len(),
                        error = %e,
                        "Feed batch write failed, continuing"
                    );
                    report.failed_batches += 1;
                }
            }
        }

        self.pages.invalidate(&subscribers).await;

        info!(
            creator_id = %creator_id,
            post_id = %post_id,
            subscribers = report.subscribers,
            written = report.written,
            duplicate_batches = report.duplicate_batches,
            failed_batches = report.failed_batches,
            "Fan-out complete"
        );
        Ok(report)
    }

    /// Removes a post from every feed holding it and invalidates those feeds.
    pub async fn remove_by_entity(&self, post_id: Uuid) -> Result<usize> {
        let users = self
            .feed
            .delete_by_post(post_id)
            .with_context(|| format!("Failed to remove feed entries for post {}", post_id))?;

        if users.is_empty() {
            return Ok(0);
        }

        self.pages.invalidate(&users).await;
        if users.len() > 1_000 {
            warn!(post_id = %post_id, feeds = users.len(), "Removed post from a large number of feeds");
        }
        info!(post_id = %post_id, feeds = users.len(), "Removed post from feeds");
        Ok(users.len())
    }
}
