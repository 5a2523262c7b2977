use super::EventDispatcher;
use crate::event::EventEnvelope;
use crate::nats::NatsConfig;
use anyhow::{Context, Result};
use async_nats::jetstream::{self, AckKind};
use futures::StreamExt;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Event consumer configuration
#[derive(Clone, Debug, Deserialize)]
pub struct ConsumerConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Durable consumer name; instances sharing it split the work
    #[serde(default = "default_durable_name")]
    pub durable_name: String,
    /// Deliveries before JetStream gives up on a message
    #[serde(default = "default_max_deliver")]
    pub max_deliver: i64,
}

fn default_enabled() -> bool {
    true
}

fn default_durable_name() -> String {
    "ripple-dispatcher".to_string()
}

fn default_max_deliver() -> i64 {
    10
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            durable_name: default_durable_name(),
            max_deliver: default_max_deliver(),
        }
    }
}

/// Pulls events from the stream and hands them to the dispatcher.
///
/// A handled message is acked, a failed one is nak'ed for redelivery, and a
/// message that cannot be decoded is acked after logging so it does not
/// loop forever.
pub async fn run_subscriber(
    dispatcher: Arc<EventDispatcher>,
    jetstream: jetstream::Context,
    nats: NatsConfig,
    config: ConsumerConfig,
) -> Result<()> {
    info!(durable = %config.durable_name, "Starting event consumer");

    let stream = jetstream
        .get_stream(&nats.stream_name)
        .await
        .with_context(|| format!("Failed to get stream '{}'", nats.stream_name))?;

    let consumer = stream
        .get_or_create_consumer(
            &config.durable_name,
            jetstream::consumer::pull::Config {
                durable_name: Some(config.durable_name.clone()),
                filter_subject: format!("{}.>", nats.subject_prefix),
                max_deliver: config.max_deliver,
                ..Default::default()
            },
        )
        .await
        .context("Failed to get or create consumer")?;

    let mut messages = consumer
        .messages()
        .await
        .context("Failed to open consumer message stream")?;

    while let Some(next) = messages.next().await {
        let msg = match next {
            Ok(msg) => msg,
            Err(e) => {
                error!(error = %e, "Error receiving message");
                continue;
            }
        };

        let envelope = match serde_json::from_slice::<EventEnvelope>(&msg.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                error!(subject = %msg.subject, error = %e, "Failed to decode event, skipping");
                if let Err(e) = msg.ack().await {
                    error!(error = %e, "Failed to acknowledge message");
                }
                continue;
            }
        };

        match dispatcher.handle(&envelope).await {
            Ok(()) => {
                if let Err(e) = msg.ack().await {
                    error!(error = %e, "Failed to acknowledge message");
                }
            }
            Err(e) => {
                warn!(
                    id = envelope.id,
                    event_type = %envelope.event_type(),
                    error = %e,
                    "Event handler failed, requesting redelivery"
                );
                if let Err(e) = msg.ack_with(AckKind::Nak(None)).await {
                    error!(error = %e, "Failed to nak message");
                }
            }
        }
    }

    warn!("Event consumer stream ended");
    Ok(())
}
