//! Configuration management for Augur
//!
//! Configuration is loaded from environment variables.

use anyhow::{bail, Context, Result};
use std::env;
use std::str::FromStr;

/// Backend used for usage records and the prediction cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Redis,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "redis" => Ok(StoreBackend::Redis),
            "memory" => Ok(StoreBackend::Memory),
            other => bail!("unknown store backend '{}'", other),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,

    /// Redis connection URL
    pub redis_url: String,
    /// Where usage records and cached predictions live
    pub store_backend: StoreBackend,

    /// Forecasting service base URL
    pub forecast_api_url: String,
    /// Timeout for a single forecast call (in seconds)
    pub forecast_timeout_seconds: u64,

    /// Prediction cache TTL (in seconds)
    pub prediction_cache_ttl_seconds: u64,

    /// Daily prediction cap for free plans
    pub free_daily_limit: i64,
    /// Length of the free-plan reset window (in seconds)
    pub quota_reset_window_seconds: i64,
    /// Length of the plan window given to newly created records (in days)
    pub default_plan_days: i64,

    /// Header carrying the caller's user id
    pub user_id_header: String,

    /// Stream carrying subscription-change events
    pub subscription_stream: String,
    /// Consumer group used by the relay
    pub relay_consumer_group: String,
    /// Consumer name used by the relay within its group
    pub relay_consumer_name: String,
    /// How long a relay poll blocks waiting for events (in milliseconds)
    pub relay_block_ms: u64,
    /// Maximum events fetched per poll
    pub relay_batch_size: usize,
    /// Delay between retries of a failed store write (in milliseconds)
    pub relay_retry_backoff_ms: u64,

    /// Stream targeted by `POST /test/prediction`
    pub test_prediction_stream: String,
}

/// Read an env var, falling back to a default, and parse it
fn parse_var<T>(name: &str, default: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.parse::<T>()
        .map_err(|e| anyhow::anyhow!("{}", e))
        .with_context(|| format!("Invalid {}", name))
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let config = Self {
            host: env::var("AUGUR_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: parse_var("AUGUR_PORT", "8080")?,

            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            store_backend: parse_var("AUGUR_STORE_BACKEND", "redis")?,

            forecast_api_url: env::var("FORECAST_API_URL")
                .context("FORECAST_API_URL must be set")?,
            forecast_timeout_seconds: parse_var("FORECAST_TIMEOUT_SECONDS", "120")?,

            prediction_cache_ttl_seconds: parse_var("PREDICTION_CACHE_TTL_SECONDS", "86400")?,

            free_daily_limit: parse_var("FREE_DAILY_LIMIT", "5")?,
            quota_reset_window_seconds: parse_var("QUOTA_RESET_WINDOW_SECONDS", "86400")?,
            default_plan_days: parse_var("DEFAULT_PLAN_DAYS", "30")?,

            user_id_header: env::var("USER_ID_HEADER")
                .unwrap_or_else(|_| "x-user-id".to_string())
                .to_ascii_lowercase(),

            subscription_stream: env::var("SUBSCRIPTION_STREAM")
                .unwrap_or_else(|_| "augur:events:subscriptions".to_string()),
            relay_consumer_group: env::var("RELAY_CONSUMER_GROUP")
                .unwrap_or_else(|_| "augur-relay".to_string()),
            relay_consumer_name: env::var("RELAY_CONSUMER_NAME")
                .unwrap_or_else(|_| "relay-1".to_string()),
            relay_block_ms: parse_var("RELAY_BLOCK_MS", "1000")?,
            relay_batch_size: parse_var("RELAY_BATCH_SIZE", "16")?,
            relay_retry_backoff_ms: parse_var("RELAY_RETRY_BACKOFF_MS", "1000")?,

            test_prediction_stream: env::var("TEST_PREDICTION_STREAM")
                .unwrap_or_else(|_| "augur:events:prediction-test".to_string()),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject values the quota gate or the cache cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.free_daily_limit <= 0 {
            bail!("FREE_DAILY_LIMIT must be positive");
        }
        if self.quota_reset_window_seconds <= 0 {
            bail!("QUOTA_RESET_WINDOW_SECONDS must be positive");
        }
        // Redis SETEX refuses a zero TTL
        if self.prediction_cache_ttl_seconds == 0 {
            bail!("PREDICTION_CACHE_TTL_SECONDS must be positive");
        }
        Ok(())
    }

    /// Configuration suitable for tests and local runs without Redis
    pub fn for_testing(forecast_api_url: &str) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            redis_url: "redis://localhost:6379".to_string(),
            store_backend: StoreBackend::Memory,
            forecast_api_url: forecast_api_url.to_string(),
            forecast_timeout_seconds: 5,
            prediction_cache_ttl_seconds: 86_400,
            free_daily_limit: 5,
            quota_reset_window_seconds: 86_400,
            default_plan_days: 30,
            user_id_header: "x-user-id".to_string(),
            subscription_stream: "augur:events:subscriptions".to_string(),
            relay_consumer_group: "augur-relay".to_string(),
            relay_consumer_name: "relay-test".to_string(),
            relay_block_ms: 50,
            relay_batch_size: 16,
            relay_retry_backoff_ms: 10,
            test_prediction_stream: "augur:events:prediction-test".to_string(),
        }
    }
}
