//! Subscription relay integration tests
//!
//! Runs the relay loop against the in-memory queue and checks its effect on
//! the prediction endpoint.

use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use augur::{
    error::AppResult,
    queue::EventPublisher,
    relay::{RelayStats, SubscriptionRelay},
    usage::{PlanType, UsageStore},
    QuotaPolicy,
};

use crate::common::constants::TEST_USER_ID;
use crate::common::forecast_mocks::mock_any_forecast;
use crate::common::TestApp;

struct RunningRelay {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<AppResult<RelayStats>>,
}

impl RunningRelay {
    fn start(app: &TestApp) -> Self {
        let relay = SubscriptionRelay::new(
            app.store.clone(),
            QuotaPolicy::from_config(&app.config),
            Duration::from_millis(app.config.relay_retry_backoff_ms),
        );
        let mut source = app.queue.consumer(
            &app.config.subscription_stream,
            Duration::from_millis(app.config.relay_block_ms),
            app.config.relay_batch_size,
        );
        let (shutdown, rx) = watch::channel(false);
        let handle = tokio::spawn(async move { relay.run(&mut source, rx).await });
        Self { shutdown, handle }
    }

    async fn stop(self) -> RelayStats {
        self.shutdown.send(true).unwrap();
        self.handle.await.unwrap().unwrap()
    }
}

fn premium_event(user_id: &str) -> String {
    let now = Utc::now();
    json!({
        "userId": user_id,
        "subscriptionPlanId": "plan_premium_monthly",
        "startDate": (now - ChronoDuration::days(1)).to_rfc3339(),
        "endDate": (now + ChronoDuration::days(29)).to_rfc3339(),
        "subscriptionPlanType": "premium"
    })
    .to_string()
}

/// Wait until the relay has consumed everything on the subscription stream
async fn wait_for_drain(app: &TestApp) {
    let stream = &app.config.subscription_stream;
    for _ in 0..100 {
        if app.queue.ready_len(stream).await == 0 && app.queue.pending_len(stream).await == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("relay did not drain the subscription stream");
}

#[tokio::test]
async fn test_upgrade_event_lifts_daily_limit() {
    let app = TestApp::spawn().await;
    mock_any_forecast(&app.forecast_api).await;

    for _ in 0..5 {
        app.predict(TEST_USER_ID, "AAPL").await.assert_status_ok();
    }
    app.predict(TEST_USER_ID, "AAPL")
        .await
        .assert_status(axum::http::StatusCode::FORBIDDEN);

    let relay = RunningRelay::start(&app);
    app.queue
        .publish(&app.config.subscription_stream, &premium_event(TEST_USER_ID))
        .await
        .unwrap();
    wait_for_drain(&app).await;
    let stats = relay.stop().await;
    assert_eq!(stats.processed, 1);

    let record = app.store.get(TEST_USER_ID).await.unwrap().unwrap();
    assert_eq!(record.subscription_plan_type, PlanType::Premium);
    assert_eq!(record.daily_limit, -1);
    // The relay leaves counting state alone
    assert_eq!(record.daily_count, 5);

    let response = app.predict(TEST_USER_ID, "AAPL").await;
    response.assert_status_ok();
    assert_eq!(response.headers()["x-quota-plan"], "premium");
}

#[tokio::test]
async fn test_replayed_event_is_idempotent() {
    let app = TestApp::spawn().await;
    let event = premium_event(TEST_USER_ID);

    let relay = RunningRelay::start(&app);
    app.queue
        .publish(&app.config.subscription_stream, &event)
        .await
        .unwrap();
    wait_for_drain(&app).await;
    let once = app.store.get(TEST_USER_ID).await.unwrap().unwrap();

    app.queue
        .publish(&app.config.subscription_stream, &event)
        .await
        .unwrap();
    wait_for_drain(&app).await;
    let twice = app.store.get(TEST_USER_ID).await.unwrap().unwrap();
    relay.stop().await;

    assert_eq!(once.subscription_plan_id, twice.subscription_plan_id);
    assert_eq!(once.subscription_plan_type, twice.subscription_plan_type);
    assert_eq!(once.subscription_start_date, twice.subscription_start_date);
    assert_eq!(once.subscription_end_date, twice.subscription_end_date);
    assert_eq!(once.daily_limit, twice.daily_limit);
    assert_eq!(once.daily_count, twice.daily_count);
}

#[tokio::test]
async fn test_malformed_event_is_dropped_and_loop_continues() {
    let app = TestApp::spawn().await;
    mock_any_forecast(&app.forecast_api).await;

    // Existing free user with some usage
    app.predict(TEST_USER_ID, "AAPL").await.assert_status_ok();
    let before = app.store.get(TEST_USER_ID).await.unwrap().unwrap();

    let relay = RunningRelay::start(&app);
    let stream = app.config.subscription_stream.clone();
    let missing_end_date = json!({
        "userId": TEST_USER_ID,
        "subscriptionPlanId": "plan_premium_monthly",
        "startDate": Utc::now().to_rfc3339(),
        "subscriptionPlanType": "premium"
    })
    .to_string();

    app.queue.publish(&stream, &missing_end_date).await.unwrap();
    app.queue.publish(&stream, "{not json").await.unwrap();
    app.queue
        .publish(&stream, &premium_event("other_user"))
        .await
        .unwrap();
    wait_for_drain(&app).await;
    let stats = relay.stop().await;

    assert_eq!(stats.dropped, 2);
    assert_eq!(stats.processed, 1);

    let after = app.store.get(TEST_USER_ID).await.unwrap().unwrap();
    assert_eq!(before, after);

    let other = app.store.get("other_user").await.unwrap().unwrap();
    assert_eq!(other.subscription_plan_type, PlanType::Premium);
}

#[tokio::test]
async fn test_queue_loss_stops_relay_with_error() {
    let app = TestApp::spawn().await;
    let relay = SubscriptionRelay::new(
        app.store.clone(),
        QuotaPolicy::from_config(&app.config),
        Duration::from_millis(app.config.relay_retry_backoff_ms),
    );
    let mut source = app.queue.consumer(
        &app.config.subscription_stream,
        Duration::from_millis(app.config.relay_block_ms),
        app.config.relay_batch_size,
    );
    let (_shutdown, rx) = watch::channel(false);

    app.queue.close();
    let result = tokio::time::timeout(Duration::from_secs(2), relay.run(&mut source, rx))
        .await
        .expect("relay should stop on its own");

    assert!(result.is_err());
}
