// Shared fixtures for integration tests
#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use ripple::cache::{CounterCache, MemoryKvStore};
use ripple::consumer::EventDispatcher;
use ripple::db::Database;
use ripple::event::EventEnvelope;
use ripple::feed::{FanoutDistributor, FeedPageCache, FeedReader, FeedStore};
use ripple::notification::NotificationStore;
use ripple::outbox::{Broker, OutboxRelay, OutboxStore};
use ripple::rate_limit::{RateLimitConfig, RateLimiter};
use ripple::social::{SocialStore, WriteService};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// In-process broker: keeps published messages in order, can be switched off.
#[derive(Default)]
pub struct MemoryBroker {
    messages: Mutex<Vec<(String, String, Vec<u8>)>>,
    down: AtomicBool,
}

impl MemoryBroker {
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// Removes and decodes everything published so far.
    pub fn drain(&self) -> Vec<EventEnvelope> {
        self.messages
            .lock()
            .unwrap()
            .drain(..)
            .map(|(_, _, payload)| serde_json::from_slice(&payload).unwrap())
            .collect()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn publish(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<()> {
        if self.down.load(Ordering::SeqCst) {
            return Err(anyhow!("broker unreachable"));
        }
        self.messages
            .lock()
            .unwrap()
            .push((topic.to_string(), key.to_string(), payload));
        Ok(())
    }
}

/// One service instance wired over in-memory SQLite and the memory store.
pub struct Service {
    pub db: Arc<Database>,
    pub kv: Arc<MemoryKvStore>,
    pub social: SocialStore,
    pub writes: WriteService,
    pub outbox: OutboxStore,
    pub relay: OutboxRelay,
    pub broker: Arc<MemoryBroker>,
    pub dispatcher: EventDispatcher,
    pub counters: CounterCache,
    pub notifications: NotificationStore,
    pub feed: Arc<FeedStore>,
    pub reader: FeedReader,
}

impl Service {
    pub fn new(rate_limit: RateLimitConfig) -> Self {
        let db = Arc::new(Database::in_memory().unwrap());
        let kv = Arc::new(MemoryKvStore::new());
        let broker = Arc::new(MemoryBroker::default());
        let outbox = OutboxStore::new(db.clone());
        let social = SocialStore::new(db.clone());
        let feed = Arc::new(FeedStore::new(db.clone()));
        let pages = FeedPageCache::new(kv.clone(), Duration::from_secs(300));
        let counters = CounterCache::new(kv.clone(), CounterCache::DEFAULT_TTL);
        let notifications = NotificationStore::new(db.clone());

        let fanout = Arc::new(FanoutDistributor::new(
            Arc::new(social.clone()),
            feed.clone(),
            pages.clone(),
            50,
        ));
        let limiter = Arc::new(RateLimiter::new(kv.clone(), rate_limit));

        Self {
            writes: WriteService::new(db.clone(), limiter),
            relay: OutboxRelay::new(outbox.clone(), broker.clone(), 100),
            dispatcher: EventDispatcher::new(fanout, counters.clone(), notifications.clone()),
            reader: FeedReader::new(feed.clone(), pages, 20),
            db,
            kv,
            social,
            outbox,
            broker,
            counters,
            notifications,
            feed,
        }
    }

    /// Relays the outbox and feeds every published message to the dispatcher.
    pub async fn pump(&mut self) -> usize {
        self.relay.run_cycle().await.unwrap();
        let envelopes = self.broker.drain();
        for envelope in &envelopes {
            self.dispatcher.handle(envelope).await.unwrap();
        }
        envelopes.len()
    }
}
