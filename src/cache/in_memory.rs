//! In-memory cache implementation
//!
//! Same API as `RedisCache`, for tests and for runs without Redis.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::RwLock;

use crate::error::AppResult;

/// Entry in the in-memory cache with expiration
struct CacheEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        self.expires_at.map(|exp| Instant::now() > exp).unwrap_or(false)
    }
}

/// In-memory cache
///
/// Stores serialized values in a HashMap with TTL-based expiration.
/// A TTL of zero means the entry never expires.
pub struct InMemoryCache {
    data: RwLock<HashMap<String, CacheEntry>>,
    default_ttl: u64,
}

impl InMemoryCache {
    /// Create a new in-memory cache with the specified default TTL
    pub fn new(default_ttl: u64) -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
            default_ttl,
        }
    }

    /// Get a value from cache
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> AppResult<Option<T>> {
        let data = self.data.read().await;

        match data.get(key) {
            Some(entry) if !entry.is_expired() => {
                let parsed: T = serde_json::from_str(&entry.value)?;
                Ok(Some(parsed))
            }
            _ => Ok(None),
        }
    }

    /// Set a value in cache with default TTL
    pub async fn set<T: Serialize>(&self, key: &str, value: &T) -> AppResult<()> {
        self.set_with_ttl(key, value, self.default_ttl).await
    }

    /// Set a value in cache with custom TTL
    pub async fn set_with_ttl<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl_seconds: u64,
    ) -> AppResult<()> {
        let serialized = serde_json::to_string(value)?;
        let expires_at = if ttl_seconds > 0 {
            Some(Instant::now() + Duration::from_secs(ttl_seconds))
        } else {
            None
        };

        self.data.write().await.insert(
            key.to_string(),
            CacheEntry {
                value: serialized,
                expires_at,
            },
        );
        Ok(())
    }

    /// Force an entry to expire now (used to exercise TTL handling)
    pub async fn expire_now(&self, key: &str) {
        if let Some(entry) = self.data.write().await.get_mut(key) {
            entry.expires_at = Some(Instant::now() - Duration::from_millis(1));
        }
    }
}
