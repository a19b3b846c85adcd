//! Prediction result cache
//!
//! Caches shaped forecast results per ticker with a fixed TTL.

use std::sync::Arc;

use tracing::{debug, instrument};

use crate::{
    cache::{redis::keys, InMemoryCache, RedisCache},
    error::AppResult,
};

use super::service::PredictionResult;

/// Cache backend abstraction for PredictionCache
pub enum PredictionCacheBackend {
    /// Redis-based cache for production use
    Redis(Arc<RedisCache>),
    /// In-memory cache for tests and local runs
    InMemory(Arc<InMemoryCache>),
}

impl PredictionCacheBackend {
    async fn get(&self, key: &str) -> AppResult<Option<PredictionResult>> {
        match self {
            PredictionCacheBackend::Redis(cache) => cache.get(key).await,
            PredictionCacheBackend::InMemory(cache) => cache.get(key).await,
        }
    }

    async fn set(&self, key: &str, value: &PredictionResult) -> AppResult<()> {
        match self {
            PredictionCacheBackend::Redis(cache) => cache.set(key, value).await,
            PredictionCacheBackend::InMemory(cache) => cache.set(key, value).await,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            PredictionCacheBackend::Redis(_) => "redis",
            PredictionCacheBackend::InMemory(_) => "memory",
        }
    }

    async fn ping(&self) -> AppResult<()> {
        match self {
            PredictionCacheBackend::Redis(cache) => cache.ping().await,
            PredictionCacheBackend::InMemory(_) => Ok(()),
        }
    }
}

/// Per-ticker prediction cache
pub struct PredictionCache {
    backend: PredictionCacheBackend,
}

impl PredictionCache {
    /// Create a prediction cache over Redis
    ///
    /// The TTL is taken from the `RedisCache` default.
    pub fn new(cache: Arc<RedisCache>) -> Self {
        Self {
            backend: PredictionCacheBackend::Redis(cache),
        }
    }

    /// Create a prediction cache held in memory
    pub fn in_memory(cache: Arc<InMemoryCache>) -> Self {
        Self {
            backend: PredictionCacheBackend::InMemory(cache),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    #[instrument(skip(self), fields(ticker = %ticker))]
    pub async fn get(&self, ticker: &str) -> AppResult<Option<PredictionResult>> {
        let result = self.backend.get(&keys::prediction(ticker)).await?;
        debug!(hit = result.is_some(), "Prediction cache lookup");
        Ok(result)
    }

    #[instrument(skip(self, result), fields(ticker = %ticker))]
    pub async fn set(&self, ticker: &str, result: &PredictionResult) -> AppResult<()> {
        self.backend.set(&keys::prediction(ticker), result).await
    }

    pub async fn ping(&self) -> AppResult<()> {
        self.backend.ping().await
    }
}
