use super::FeedRepository;
use anyhow::Result;
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Feed retention configuration
#[derive(Clone, Debug, Deserialize)]
pub struct JanitorConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,
    /// Feed rows older than this are deleted
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
    /// Rows deleted per statement
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_enabled() -> bool {
    true
}

fn default_interval_minutes() -> u64 {
    60
}

fn default_retention_days() -> i64 {
    7
}

fn default_batch_size() -> usize {
    1_000
}

impl Default for JanitorConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            interval_minutes: default_interval_minutes(),
            retention_days: default_retention_days(),
            batch_size: default_batch_size(),
        }
    }
}

/// Deletes feed rows past the retention window in bounded batches.
pub struct FeedJanitor {
    feed: Arc<dyn FeedRepository>,
    retention: chrono::Duration,
    batch_size: usize,
}

impl FeedJanitor {
    pub fn new(feed: Arc<dyn FeedRepository>, config: &JanitorConfig) -> Self {
        Self {
            feed,
            retention: chrono::Duration::days(config.retention_days.max(0)),
            batch_size: config.batch_size.max(1),
        }
    }

    /// One sweep: deletes batches until a batch comes back short.
    pub fn run_once(&self) -> Result<usize> {
        let cutoff = Utc::now() - self.retention;
        let mut total = 0;
        loop {
            let deleted = self.feed.delete_older_than(cutoff, self.batch_size)?;
            total += deleted;
            if deleted < self.batch_size {
                break;
            }
        }
        if total > 0 {
            info!(deleted = total, cutoff = %cutoff, "Expired feed entries removed");
        } else {
            debug!(cutoff = %cutoff, "No expired feed entries");
        }
        Ok(total)
    }

    pub async fn run_janitor_loop(self, every: Duration) {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = self.run_once() {
                error!(error = %e, "Feed janitor sweep failed");
            }
        }
    }
}
