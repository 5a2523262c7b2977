// Fixed-window admission control for write paths.
//
// One counter per (action, subject) in the shared key-value store. The first
// hit of a window creates the key with the window as its TTL; later hits only
// increment. Rejected calls still count, so a caller that keeps hammering stays
// blocked until the window expires.

use crate::cache::KvStore;
use anyhow::Result;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Rate-limited write actions
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    CreatePost,
    CreateComment,
    AddLike,
    Follow,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::CreatePost => "create_post",
            Action::CreateComment => "create_comment",
            Action::AddLike => "add_like",
            Action::Follow => "follow",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ceiling per window for one action
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub struct RateLimitRule {
    /// Calls allowed per window
    pub ceiling: u64,
    /// Window length in seconds
    pub window_seconds: u64,
}

impl RateLimitRule {
    pub fn new(ceiling: u64, window: Duration) -> Self {
        Self {
            ceiling,
            window_seconds: window.as_secs().max(1),
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }
}

/// Rate limiter configuration
#[derive(Clone, Debug, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Allow calls when the store cannot be reached
    #[serde(default = "default_fail_open")]
    pub fail_open: bool,
    #[serde(default = "default_rules")]
    pub rules: HashMap<Action, RateLimitRule>,
}

fn default_enabled() -> bool {
    true
}

fn default_fail_open() -> bool {
    true
}

fn default_rules() -> HashMap<Action, RateLimitRule> {
    HashMap::from([
        (Action::CreatePost, RateLimitRule::new(10, Duration::from_secs(60))),
        (Action::CreateComment, RateLimitRule::new(30, Duration::from_secs(60))),
        (Action::AddLike, RateLimitRule::new(120, Duration::from_secs(60))),
        (Action::Follow, RateLimitRule::new(50, Duration::from_secs(3600))),
    ])
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            fail_open: default_fail_open(),
            rules: default_rules(),
        }
    }
}

impl RateLimitConfig {
    /// Apply env overrides, falling back to current values.
    pub fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("RIPPLE_RATE_LIMIT_ENABLED") {
            if let Ok(b) = v.parse::<bool>() {
                self.enabled = b;
            }
        }
        if let Ok(v) = std::env::var("RIPPLE_RATE_LIMIT_FAIL_OPEN") {
            if let Ok(b) = v.parse::<bool>() {
                self.fail_open = b;
            }
        }
    }
}

/// Outcome of `check_and_consume`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateDecision {
    Allowed {
        /// Calls in the current window including this one (0 when unchecked)
        count: u64,
    },
    Rejected {
        count: u64,
        /// Time until the window resets, when the store can tell
        retry_after: Option<Duration>,
    },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed { .. })
    }
}

/// Fixed-window rate limiter over a shared key-value store.
pub struct RateLimiter {
    store: Arc<dyn KvStore>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn KvStore>, config: RateLimitConfig) -> Self {
        Self { store, config }
    }

    /// Store key for a subject's counter
    pub fn key(action: Action, subject_id: &str) -> String {
        format!("rate:{}:{}", action.as_str(), subject_id)
    }

    /// Counts this call against the window for `(action, subject_id)`.
    ///
    /// Rejects once the count passes the ceiling. The increment is never
    /// rolled back. Actions without a rule are always allowed.
    pub async fn check_and_consume(&self, action: Action, subject_id: &str) -> Result<RateDecision> {
        if !self.config.enabled {
            return Ok(RateDecision::Allowed { count: 0 });
        }
        let rule = match self.config.rules.get(&action) {
            Some(rule) => *rule,
            None => return Ok(RateDecision::Allowed { count: 0 }),
        };

        let key = Self::key(action, subject_id);
        let count = match self.store.incr_window(&key, rule.window()).await {
            Ok(count) => count.max(0) as u64,
            Err(e) if self.config.fail_open => {
                warn!(
                    action = %action,
                    subject = %subject_id,
                    error = %e,
                    "Rate limit store unavailable, allowing request"
                );
                return Ok(RateDecision::Allowed { count: 0 });
            }
            Err(e) => return Err(e),
        };

        if count > rule.ceiling {
            let retry_after = self.store.ttl(&key).await.ok().flatten();
            debug!(
                action = %action,
                subject = %subject_id,
                count,
                ceiling = rule.ceiling,
                "Rate limit exceeded"
            );
            return Ok(RateDecision::Rejected { count, retry_after });
        }

        Ok(RateDecision::Allowed { count })
    }
}
