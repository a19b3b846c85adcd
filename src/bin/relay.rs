//! Augur subscription relay
//!
//! Consumes subscription-change events from the Redis stream and applies
//! them to the usage store.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::sync::watch;
use tracing::{error, info};

use augur::{
    connect_redis,
    queue::RedisStreamConsumer,
    relay::SubscriptionRelay,
    routes::metrics,
    shutdown_signal, Config, QuotaPolicy, RedisUsageStore, StoreBackend, UsageStore,
};

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "augur=info".into()),
        )
        .with_target(true)
        .init();

    match run().await {
        Ok(()) => {
            info!("Augur relay shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = ?e, "Augur relay stopped on a fatal error");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    info!("Starting Augur subscription relay");

    let config = Config::from_env()?;
    if config.store_backend != StoreBackend::Redis {
        bail!("the relay consumes a Redis stream and requires AUGUR_STORE_BACKEND=redis");
    }

    metrics::init_metrics();

    // Blocking stream reads hold their connection, so the consumer gets its own
    let store_conn = connect_redis(&config.redis_url).await?;
    let queue_conn = connect_redis(&config.redis_url).await?;

    let store: Arc<dyn UsageStore> = Arc::new(RedisUsageStore::new(store_conn));
    let mut source = RedisStreamConsumer::connect(
        queue_conn,
        &config.subscription_stream,
        &config.relay_consumer_group,
        &config.relay_consumer_name,
        config.relay_block_ms,
        config.relay_batch_size,
    )
    .await
    .context("Failed to join the subscription consumer group")?;

    info!(
        stream = %config.subscription_stream,
        group = %config.relay_consumer_group,
        consumer = %config.relay_consumer_name,
        "Subscribed to subscription events"
    );

    let relay = SubscriptionRelay::new(
        store,
        QuotaPolicy::from_config(&config),
        Duration::from_millis(config.relay_retry_backoff_ms),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let stats = relay
        .run(&mut source, shutdown_rx)
        .await
        .context("Subscription queue connection lost")?;

    info!(
        processed = stats.processed,
        dropped = stats.dropped,
        retries = stats.retries,
        "Relay drained"
    );
    Ok(())
}
