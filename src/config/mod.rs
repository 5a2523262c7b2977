use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

// Re-export section types owned by their modules
pub use crate::cache::{CacheBackend, CacheConfig};
pub use crate::consumer::ConsumerConfig;
pub use crate::feed::{FanoutConfig, JanitorConfig};
pub use crate::nats::NatsConfig;
pub use crate::ops::OpsConfig;
pub use crate::outbox::RelayConfig;
pub use crate::rate_limit::RateLimitConfig;

/// Complete Ripple configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RippleConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub nats: NatsConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub fanout: FanoutConfig,
    #[serde(default)]
    pub janitor: JanitorConfig,
    #[serde(default)]
    pub counters: CounterConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub consumer: ConsumerConfig,
    #[serde(default)]
    pub ops: OpsConfig,
}

/// System-of-record database
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    std::env::var("RIPPLE_DB_PATH").unwrap_or_else(|_| "ripple.db".to_string())
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Counter cache configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CounterConfig {
    /// Lifetime of a cached counter (seconds)
    #[serde(default = "default_counter_ttl")]
    pub ttl_seconds: u64,
}

fn default_counter_ttl() -> u64 {
    600
}

impl CounterConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

impl Default for CounterConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_counter_ttl(),
        }
    }
}

impl RippleConfig {
    /// Env vars that override file values regardless of what the file says.
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("NATS_URL") {
            self.nats.url = url;
        }
        if let Ok(path) = std::env::var("RIPPLE_DB_PATH") {
            self.database.path = path;
        }
        if let Ok(url) = std::env::var("RIPPLE_REDIS_URL") {
            self.cache.redis_url = url;
        }
        self.rate_limit.apply_env();
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> Result<RippleConfig> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read config '{}'", path))?;
    let config: RippleConfig =
        toml::from_str(&contents).with_context(|| format!("Failed to parse config '{}'", path))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::Action;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = RippleConfig::default();
        assert!(config.relay.enabled);
        assert_eq!(config.relay.interval_seconds, 5);
        assert_eq!(config.relay.page_size, 100);
        assert_eq!(config.fanout.batch_size, 50);
        assert_eq!(config.janitor.retention_days, 7);
        assert_eq!(config.counters.ttl(), Duration::from_secs(600));
        assert_eq!(config.nats.stream_name, "RIPPLE_EVENTS");
        assert_eq!(config.cache.backend, CacheBackend::Memory);
        assert_eq!(config.cache.purge_interval_seconds, 60);
        assert!(config.rate_limit.fail_open);
    }

    #[test]
    fn test_config_deserialization() {
        let toml = r#"
            [database]
            path = "/var/lib/ripple/ripple.db"

            [nats]
            url = "nats://example.com:4222"
            stream_name = "TEST_STREAM"

            [relay]
            interval_seconds = 2
            page_size = 250

            [fanout]
            batch_size = 100

            [janitor]
            retention_days = 30

            [counters]
            ttl_seconds = 120

            [rate_limit.rules.follow]
            ceiling = 5
            window_seconds = 60

            [cache]
            backend = "redis"
            redis_url = "redis://cache:6379"

            [consumer]
            durable_name = "feed-workers"

            [ops]
            bind = "127.0.0.1:9000"
        "#;

        let config: RippleConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.database.path, "/var/lib/ripple/ripple.db");
        assert_eq!(config.nats.url, "nats://example.com:4222");
        assert_eq!(config.relay.page_size, 250);
        assert_eq!(config.fanout.batch_size, 100);
        assert_eq!(config.janitor.retention_days, 30);
        assert_eq!(config.counters.ttl_seconds, 120);
        assert_eq!(config.rate_limit.rules[&Action::Follow].ceiling, 5);
        assert_eq!(config.cache.backend, CacheBackend::Redis);
        assert_eq!(config.consumer.durable_name, "feed-workers");
        assert_eq!(config.ops.bind, "127.0.0.1:9000");
    }

    #[test]
    fn test_partial_config() {
        // Missing sections and fields use defaults
        let toml = r#"
            [relay]
            page_size = 10
        "#;

        let config: RippleConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.relay.page_size, 10);
        assert_eq!(config.relay.interval_seconds, 5);
        assert_eq!(config.fanout.batch_size, 50);
        assert_eq!(config.rate_limit.rules.len(), 4);
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[janitor]\nbatch_size = 10").unwrap();

        let config = load_config(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.janitor.batch_size, 10);

        assert!(load_config("/nonexistent/ripple.toml").is_err());
    }
}
