use anyhow::{Context, Result};
use ripple::cache::{CacheBackend, CounterCache, KvStore, MemoryKvStore};
use ripple::config::{load_config, RippleConfig};
use ripple::consumer::{run_subscriber, EventDispatcher};
use ripple::db::Database;
use ripple::feed::{FanoutDistributor, FeedJanitor, FeedPageCache, FeedStore};
use ripple::nats::{NatsBroker, NatsClient};
use ripple::notification::NotificationStore;
use ripple::ops::{create_ops_router, OpsAppState};
use ripple::outbox::{OutboxRelay, OutboxStore};
use ripple::social::SocialStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ripple=info".into()),
        )
        .init();

    info!("Ripple starting...");

    let mut config = match std::env::var("RIPPLE_CONFIG") {
        Ok(path) => load_config(&path)?,
        Err(_) => RippleConfig::default(),
    };
    config.apply_env();

    info!(
        db_path = %config.database.path,
        nats_url = %config.nats.url,
        cache = ?config.cache.backend,
        "Configuration loaded"
    );

    let db = Arc::new(
        Database::open(&config.database.path).context("Failed to initialize database")?,
    );
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();
    let kv = build_kv_store(&config, &mut tasks).await?;

    let nats = NatsClient::connect(config.nats.clone()).await?;
    let jetstream = nats.jetstream().clone();

    // Outbox relay
    let outbox = OutboxStore::new(db.clone());
    if config.relay.enabled {
        let broker = Arc::new(NatsBroker::new(jetstream.clone(), &config.nats));
        let relay = OutboxRelay::new(outbox.clone(), broker, config.relay.page_size);
        let every = Duration::from_secs(config.relay.interval_seconds);
        tasks.push(tokio::spawn(relay.run_relay_loop(every)));
        info!(interval_seconds = config.relay.interval_seconds, "Outbox relay started");
    }

    // Feed retention
    let feed = Arc::new(FeedStore::new(db.clone()));
    if config.janitor.enabled {
        let janitor = FeedJanitor::new(feed.clone(), &config.janitor);
        let every = Duration::from_secs(config.janitor.interval_minutes * 60);
        tasks.push(tokio::spawn(janitor.run_janitor_loop(every)));
        info!(retention_days = config.janitor.retention_days, "Feed janitor started");
    }

    // Event consumer
    if config.consumer.enabled {
        let pages = FeedPageCache::new(
            kv.clone(),
            Duration::from_secs(config.fanout.page_ttl_seconds),
        );
        let fanout = Arc::new(FanoutDistributor::new(
            Arc::new(SocialStore::new(db.clone())),
            feed.clone(),
            pages,
            config.fanout.batch_size,
        ));
        let dispatcher = Arc::new(EventDispatcher::new(
            fanout,
            CounterCache::new(kv.clone(), config.counters.ttl()),
            NotificationStore::new(db.clone()),
        ));
        let js = jetstream.clone();
        let nats_config = config.nats.clone();
        let consumer_config = config.consumer.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = run_subscriber(dispatcher, js, nats_config, consumer_config).await {
                error!(error = %e, "Event consumer stopped");
            }
        }));
    }

    // Ops HTTP surface
    if config.ops.enabled {
        let router = create_ops_router(OpsAppState { outbox });
        let listener = tokio::net::TcpListener::bind(&config.ops.bind)
            .await
            .with_context(|| format!("Failed to bind ops address {}", config.ops.bind))?;
        info!(bind = %config.ops.bind, "Ops API listening");
        tasks.push(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                error!(error = %e, "Ops API server error");
            }
        }));
    }

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl_c signal")?;
    info!("Shutdown signal received");

    for task in tasks {
        task.abort();
    }
    info!("Ripple stopped");

    Ok(())
}

async fn build_kv_store(
    config: &RippleConfig,
    tasks: &mut Vec<JoinHandle<()>>,
) -> Result<Arc<dyn KvStore>> {
    match config.cache.backend {
        CacheBackend::Memory => {
            let store = Arc::new(MemoryKvStore::new());
            let every = Duration::from_secs(config.cache.purge_interval_seconds.max(1));
            tasks.push(tokio::spawn(store.clone().run_purge_loop(every)));
            Ok(store)
        }
        #[cfg(feature = "redis-store")]
        CacheBackend::Redis => {
            let store = ripple::cache::RedisKvStore::connect(&config.cache.redis_url).await?;
            info!(url = %config.cache.redis_url, "Connected to Redis");
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "redis-store"))]
        CacheBackend::Redis => {
            anyhow::bail!("cache.backend = \"redis\" requires the redis-store feature")
        }
    }
}
