//! Fan-out on write: one feed row per follower when a post is created.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

mod distributor;
mod janitor;
mod pages;
mod store;

#[cfg(test)]
mod tests;

pub use distributor::{FanoutConfig, FanoutDistributor, FanoutReport};
pub use janitor::{FeedJanitor, JanitorConfig};
pub use pages::{FeedPageCache, FeedReader};
pub use store::FeedStore;

/// One post materialized into one user's feed.
///
/// `(user_id, post_id)` is unique.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedEntry {
    /// Row id; 0 until stored
    pub id: i64,
    /// Feed owner (a follower of the post author)
    pub user_id: Uuid,
    pub post_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Failure of a batched feed write
#[derive(Debug)]
pub enum FeedWriteError {
    /// The batch hit the `(user_id, post_id)` uniqueness constraint; nothing
    /// from it was written
    Duplicate,
    Other(anyhow::Error),
}

impl fmt::Display for FeedWriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedWriteError::Duplicate => write!(f, "feed batch contains existing entries"),
            FeedWriteError::Other(e) => write!(f, "feed batch write failed: {}", e),
        }
    }
}

impl std::error::Error for FeedWriteError {}

impl From<anyhow::Error> for FeedWriteError {
    fn from(e: anyhow::Error) -> Self {
        FeedWriteError::Other(e)
    }
}

/// Storage for materialized feed rows
pub trait FeedRepository: Send + Sync {
    /// Inserts one post for every user in `user_ids`, all or nothing.
    fn insert_batch(
        &self,
        post_id: Uuid,
        created_at: DateTime<Utc>,
        user_ids: &[Uuid],
    ) -> Result<usize, FeedWriteError>;

    /// Deletes every row for `post_id`, returning the users whose feeds held it.
    fn delete_by_post(&self, post_id: Uuid) -> Result<Vec<Uuid>>;

    /// Deletes at most `limit` rows created before `cutoff`. Returns rows deleted.
    fn delete_older_than(&self, cutoff: DateTime<Utc>, limit: usize) -> Result<usize>;

    /// A user's feed, newest first
    fn list_for_user(&self, user_id: Uuid, offset: usize, limit: usize) -> Result<Vec<FeedEntry>>;
}

/// Who receives a creator's posts
pub trait SubscriberSource: Send + Sync {
    fn subscribers_of(&self, creator_id: Uuid) -> Result<Vec<Uuid>>;
}
