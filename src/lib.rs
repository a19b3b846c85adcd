//! Augur - prediction-serving API with subscription-aware daily quotas
//!
//! The library holds everything both binaries share: the usage store, the
//! quota gate, the prediction cache, the subscription relay and the HTTP
//! router.

pub mod cache;
pub mod config;
pub mod error;
pub mod middleware;
pub mod prediction;
pub mod queue;
pub mod quota;
pub mod relay;
pub mod routes;
pub mod usage;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::info;

pub use crate::cache::{InMemoryCache, RedisCache};
pub use crate::config::{Config, StoreBackend};
pub use crate::prediction::{Forecaster, HttpForecaster, PredictionCache, PredictionService};
pub use crate::queue::{EventPublisher, InMemoryQueue, RedisStreamPublisher};
pub use crate::quota::{QuotaGate, QuotaPolicy};
pub use crate::usage::{InMemoryUsageStore, RedisUsageStore, UsageStore};

/// Application state shared across all request handlers
pub struct AppState {
    pub config: Config,
    pub start_time: Instant,
    /// Per-user usage records
    pub store: Arc<dyn UsageStore>,
    pub quota_gate: Arc<QuotaGate>,
    /// Cached forecasts in front of the forecasting service
    pub predictions: Arc<PredictionService>,
    /// Outbound queue for test prediction events
    pub publisher: Arc<dyn EventPublisher>,
}

impl AppState {
    /// Create a new application state from configuration
    pub async fn new(config: Config) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .pool_max_idle_per_host(100)
            .timeout(Duration::from_secs(config.forecast_timeout_seconds))
            .build()
            .context("Failed to build HTTP client")?;
        let forecaster: Arc<dyn Forecaster> =
            Arc::new(HttpForecaster::new(http_client, &config));

        let (store, cache, publisher): (
            Arc<dyn UsageStore>,
            PredictionCache,
            Arc<dyn EventPublisher>,
        ) = match config.store_backend {
            StoreBackend::Redis => {
                let redis = connect_redis(&config.redis_url).await?;
                (
                    Arc::new(RedisUsageStore::new(redis.clone())),
                    PredictionCache::new(Arc::new(RedisCache::new(
                        redis.clone(),
                        config.prediction_cache_ttl_seconds,
                    ))),
                    Arc::new(RedisStreamPublisher::new(redis)),
                )
            }
            StoreBackend::Memory => (
                Arc::new(InMemoryUsageStore::new()),
                PredictionCache::in_memory(Arc::new(InMemoryCache::new(
                    config.prediction_cache_ttl_seconds,
                ))),
                Arc::new(InMemoryQueue::new()),
            ),
        };
        info!(
            backend = store.name(),
            cache = cache.backend_name(),
            "Storage backends ready"
        );

        Ok(Self::from_parts(config, store, forecaster, cache, publisher))
    }

    /// Assemble application state from already-built components
    ///
    /// Used by tests to run the real router over in-memory backends and a
    /// mocked forecasting service.
    pub fn from_parts(
        config: Config,
        store: Arc<dyn UsageStore>,
        forecaster: Arc<dyn Forecaster>,
        cache: PredictionCache,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        let quota_gate = Arc::new(QuotaGate::new(
            store.clone(),
            QuotaPolicy::from_config(&config),
        ));
        let predictions = Arc::new(PredictionService::new(forecaster, cache));

        Self {
            config,
            start_time: Instant::now(),
            store,
            quota_gate,
            predictions,
            publisher,
        }
    }
}

/// Open a managed Redis connection
pub async fn connect_redis(url: &str) -> Result<redis::aio::ConnectionManager> {
    let client = redis::Client::open(url).context("Invalid REDIS_URL")?;
    redis::aio::ConnectionManager::new(client)
        .await
        .context("Failed to connect to Redis")
}

/// Resolve when the process receives Ctrl+C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::warn!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            tracing::warn!("Received SIGTERM, initiating shutdown");
        }
    }
}
