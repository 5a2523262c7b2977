//! Transactional outbox: event rows written alongside domain writes, published
//! later by the relay.
//!
//! Delivery is at-least-once. A crash between a successful publish and the
//! batched `sent = 1` update republishes the row on the next cycle, and
//! concurrent instances may publish the same row twice.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

mod relay;
mod store;


pub use relay::{OutboxRelay, PassReport, RelayConfig};
pub use store::{OutboxBacklog, OutboxStore};

/// Monotonic outbox row id
pub type EventId = i64;

/// One row of the `outbox_events` table.
///
/// `event_type` stays a raw string here: rows written by another build may
/// carry a kind this build does not know.
#[derive(Clone, Debug, PartialEq)]
pub struct OutboxEvent {
    pub id: EventId,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub event_type: String,
    pub payload: Value,
    pub sent: bool,
    pub created_at: DateTime<Utc>,
}

/// Outbound port to the message broker.
///
/// `key` is the partition key; the broker is expected to keep messages with
/// the same key in order.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn publish(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<()>;
}
