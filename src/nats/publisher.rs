use super::NatsConfig;
use crate::outbox::Broker;
use anyhow::{Context, Result};
use async_nats::jetstream;
use async_nats::HeaderMap;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Header carrying the partition key of a published event
pub const PARTITION_KEY_HEADER: &str = "Ripple-Partition-Key";

/// Publishes outbox events to NATS JetStream
#[derive(Clone)]
pub struct NatsBroker {
    jetstream: jetstream::Context,
    config: NatsConfig,
    ack_timeout: Duration,
}

impl NatsBroker {
    pub fn new(jetstream: jetstream::Context, config: &NatsConfig) -> Self {
        Self {
            jetstream,
            config: config.clone(),
            ack_timeout: Duration::from_secs(config.publish_timeout_seconds),
        }
    }
}

#[async_trait]
impl Broker for NatsBroker {
    /// Subject format: {subject_prefix}.{topic}
    ///
    /// The key travels as a header; JetStream keeps a single stream ordered,
    /// so per-key order holds as long as one relay publishes a key at a time.
    async fn publish(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<()> {
        let subject = self.config.subject_for(topic);

        let mut headers = HeaderMap::new();
        headers.insert(PARTITION_KEY_HEADER, key);

        debug!(subject = %subject, key = %key, "Publishing event to NATS");

        let ack = self
            .jetstream
            .publish_with_headers(subject.clone(), headers, payload.into())
            .await
            .with_context(|| format!("Failed to publish event to subject '{}'", subject))?;

        tokio::time::timeout(self.ack_timeout, ack)
            .await
            .context("Timed out waiting for publish ack")?
            .context("Failed to await publish ack")?;

        Ok(())
    }
}
