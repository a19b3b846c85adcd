//! Common test utilities for Augur
//!
//! Builds the real router over in-memory backends, with the forecasting
//! service replaced by a wiremock server.

#![allow(dead_code)]

pub mod redis;

use std::sync::Arc;

use axum_test::TestServer;
use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use augur::{
    routes,
    usage::{PlanType, UsageRecord, UNLIMITED},
    AppState, Config, HttpForecaster, InMemoryCache, InMemoryQueue, InMemoryUsageStore,
    PredictionCache,
};

/// Test configuration constants
pub mod constants {
    /// Header carrying the caller id
    pub const USER_HEADER: &str = "x-user-id";
    pub const TEST_USER_ID: &str = "user_123";
    pub const PREMIUM_USER_ID: &str = "premium_user";
}

/// A running Augur router plus handles on everything behind it
pub struct TestApp {
    pub server: TestServer,
    pub forecast_api: MockServer,
    pub store: Arc<InMemoryUsageStore>,
    pub cache: Arc<InMemoryCache>,
    pub queue: InMemoryQueue,
    pub config: Config,
}

impl TestApp {
    /// Start a test app with the default configuration
    pub async fn spawn() -> Self {
        Self::spawn_with(|_| {}).await
    }

    /// Start a test app, letting the caller tweak the configuration first
    pub async fn spawn_with(configure: impl FnOnce(&mut Config)) -> Self {
        let forecast_api = MockServer::start().await;

        let mut config = Config::for_testing(&forecast_api.uri());
        configure(&mut config);

        let store = Arc::new(InMemoryUsageStore::new());
        let cache = Arc::new(InMemoryCache::new(config.prediction_cache_ttl_seconds));
        let queue = InMemoryQueue::new();
        let forecaster = Arc::new(HttpForecaster::new(reqwest::Client::new(), &config));

        let state = AppState::from_parts(
            config.clone(),
            store.clone(),
            forecaster,
            PredictionCache::in_memory(cache.clone()),
            Arc::new(queue.clone()),
        );
        let server = TestServer::new(routes::create_router(Arc::new(state)))
            .expect("Failed to create test server");

        Self {
            server,
            forecast_api,
            store,
            cache,
            queue,
            config,
        }
    }

    /// `GET /prediction` as `user_id`
    pub async fn predict(&self, user_id: &str, ticker: &str) -> axum_test::TestResponse {
        self.server
            .get("/prediction")
            .add_query_param("ticker", ticker)
            .add_header(
                constants::USER_HEADER.parse().unwrap(),
                user_id.parse().unwrap(),
            )
            .await
    }

    /// Seed a premium subscription ending at `end_date`
    pub async fn seed_premium(&self, user_id: &str, end_date: DateTime<Utc>) {
        let now = Utc::now();
        let mut record = UsageRecord::new_default(
            user_id,
            now,
            self.config.free_daily_limit,
            self.config.default_plan_days,
        );
        record.subscription_plan_type = PlanType::Premium;
        record.daily_limit = UNLIMITED;
        record.subscription_plan_id = Some("plan_premium_monthly".to_string());
        record.subscription_start_date = Some(end_date - Duration::days(30));
        record.subscription_end_date = Some(end_date);
        self.store.put(record).await;
    }
}

/// Forecasting service response bodies
pub mod forecast_mocks {
    use super::*;

    pub fn forecast_body() -> Value {
        json!({
            "predictions": [189.25, 190.1, 191.42],
            "dates": ["2024-11-04", "2024-11-05", "2024-11-06"],
            "mape": 2.31
        })
    }

    /// Mount a successful forecast for `ticker`, expecting `calls` hits
    pub async fn mock_forecast(server: &MockServer, ticker: &str, calls: u64) {
        Mock::given(method("GET"))
            .and(path("/forecast"))
            .and(query_param("ticker", ticker))
            .respond_with(ResponseTemplate::new(200).set_body_json(forecast_body()))
            .expect(calls)
            .mount(server)
            .await;
    }

    /// Mount a forecast for any ticker
    pub async fn mock_any_forecast(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/forecast"))
            .respond_with(ResponseTemplate::new(200).set_body_json(forecast_body()))
            .mount(server)
            .await;
    }

    /// Mount a failing forecasting service
    pub async fn mock_forecast_failure(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/forecast"))
            .respond_with(ResponseTemplate::new(500).set_body_string("model crashed"))
            .mount(server)
            .await;
    }
}
