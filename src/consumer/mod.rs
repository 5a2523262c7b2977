// Event consumer: decodes broker messages and reacts to them

mod dispatcher;
mod subscriber;

#[cfg(test)]
mod tests;

pub use dispatcher::EventDispatcher;
pub use subscriber::{run_subscriber, ConsumerConfig};
