use anyhow::{Context, Result};
use async_nats::jetstream::{self, stream};
use serde::Deserialize;
use tracing::info;

/// NATS configuration
#[derive(Clone, Debug, Deserialize)]
pub struct NatsConfig {
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default = "default_stream_name")]
    pub stream_name: String,
    /// Prefix every published subject starts with; the topic is appended
    #[serde(default = "default_subject_prefix")]
    pub subject_prefix: String,
    #[serde(default = "default_max_age_days")]
    pub max_age_days: i64,
    #[serde(default = "default_max_bytes")]
    pub max_bytes: i64,
    /// Seconds to wait for a JetStream publish ack
    #[serde(default = "default_publish_timeout_seconds")]
    pub publish_timeout_seconds: u64,
}

fn default_url() -> String {
    std::env::var("NATS_URL").unwrap_or_else(|_| "nats://localhost:4222".to_string())
}

fn default_stream_name() -> String {
    "RIPPLE_EVENTS".to_string()
}

fn default_subject_prefix() -> String {
    "ripple.events".to_string()
}

fn default_max_age_days() -> i64 {
    7
}

fn default_max_bytes() -> i64 {
    10 * 1024 * 1024 * 1024 // 10GB
}

fn default_publish_timeout_seconds() -> u64 {
    5
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            stream_name: default_stream_name(),
            subject_prefix: default_subject_prefix(),
            max_age_days: default_max_age_days(),
            max_bytes: default_max_bytes(),
            publish_timeout_seconds: default_publish_timeout_seconds(),
        }
    }
}

impl NatsConfig {
    /// Subjects captured by the stream
    pub fn stream_subjects(&self) -> Vec<String> {
        vec![format!("{}.>", self.subject_prefix)]
    }

    /// Full subject for a topic
    pub fn subject_for(&self, topic: &str) -> String {
        format!("{}.{}", self.subject_prefix, topic)
    }
}

/// NATS client with JetStream
pub struct NatsClient {
    jetstream: jetstream::Context,
    config: NatsConfig,
}

impl NatsClient {
    /// Connect to NATS and initialize JetStream
    pub async fn connect(config: NatsConfig) -> Result<Self> {
        info!("Connecting to NATS at {}", config.url);

        let client = async_nats::connect(&config.url)
            .await
            .context("Failed to connect to NATS")?;

        let jetstream = jetstream::new(client);

        let nats_client = Self {
            jetstream,
            config,
        };

        nats_client.ensure_stream().await?;

        Ok(nats_client)
    }

    /// Ensure the event stream exists
    async fn ensure_stream(&self) -> Result<()> {
        if self.jetstream.get_stream(&self.config.stream_name).await.is_ok() {
            info!("Stream '{}' already exists", self.config.stream_name);
            return Ok(());
        }

        let stream_config = stream::Config {
            name: self.config.stream_name.clone(),
            subjects: self.config.stream_subjects(),
            max_age: std::time::Duration::from_secs((self.config.max_age_days * 86400) as u64),
            max_bytes: self.config.max_bytes,
            storage: stream::StorageType::File,
            retention: stream::RetentionPolicy::Limits,
            ..Default::default()
        };

        self.jetstream
            .create_stream(stream_config)
            .await
            .context("Failed to create JetStream stream")?;

        info!("Created JetStream stream '{}'", self.config.stream_name);
        Ok(())
    }

    /// Get JetStream context for publishing and consuming
    pub fn jetstream(&self) -> &jetstream::Context {
        &self.jetstream
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subjects_share_prefix() {
        let config = NatsConfig {
            subject_prefix: "social.events".to_string(),
            ..Default::default()
        };
        assert_eq!(config.stream_subjects(), vec!["social.events.>".to_string()]);
        assert_eq!(config.subject_for("post.created"), "social.events.post.created");
    }
}
