// NATS JetStream: stream bootstrap and the outbox broker

mod client;
mod publisher;

pub use client::{NatsClient, NatsConfig};
pub use publisher::{NatsBroker, PARTITION_KEY_HEADER};
