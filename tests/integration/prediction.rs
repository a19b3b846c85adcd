//! Prediction endpoint integration tests
//!
//! Covers `GET /prediction`: caller identification, ticker validation,
//! quota enforcement for free and premium users, and the forecast cache.

use axum::http::StatusCode;
use chrono::{Duration, Utc};
use pretty_assertions::assert_eq;
use serde_json::Value;

use augur::usage::{PlanType, UsageStore};

use crate::common::constants::{PREMIUM_USER_ID, TEST_USER_ID, USER_HEADER};
use crate::common::forecast_mocks::{
    forecast_body, mock_any_forecast, mock_forecast, mock_forecast_failure,
};
use crate::common::TestApp;

#[tokio::test]
async fn test_prediction_returns_forecast() {
    let app = TestApp::spawn().await;
    mock_forecast(&app.forecast_api, "AAPL", 1).await;

    let response = app.predict(TEST_USER_ID, "AAPL").await;

    response.assert_status_ok();
    let json: Value = response.json();
    assert_eq!(json["predictions"], forecast_body()["predictions"]);
    assert_eq!(json["dates"], forecast_body()["dates"]);
    assert_eq!(json["mape_values"], 2.31);

    let headers = response.headers();
    assert_eq!(headers["x-cache"], "MISS");
    assert_eq!(headers["x-quota-plan"], "free");
    assert_eq!(headers["x-quota-limit"], "5");
    assert_eq!(headers["x-quota-remaining"], "4");
    assert!(headers.get("x-quota-reset").is_some());
}

#[tokio::test]
async fn test_cached_prediction_skips_forecaster() {
    let app = TestApp::spawn().await;
    // The forecasting service must be hit exactly once for two requests
    mock_forecast(&app.forecast_api, "AAPL", 1).await;

    let first = app.predict(TEST_USER_ID, "AAPL").await;
    first.assert_status_ok();
    assert_eq!(first.headers()["x-cache"], "MISS");

    let second = app.predict("another_user", "aapl").await;
    second.assert_status_ok();
    assert_eq!(second.headers()["x-cache"], "HIT");

    let body1: Value = first.json();
    let body2: Value = second.json();
    assert_eq!(body1, body2);

    app.forecast_api.verify().await;
}

#[tokio::test]
async fn test_free_user_is_denied_after_daily_limit() {
    let app = TestApp::spawn().await;
    mock_any_forecast(&app.forecast_api).await;

    for i in 0..5 {
        let response = app.predict(TEST_USER_ID, "MSFT").await;
        response.assert_status_ok();
        assert_eq!(
            response.headers()["x-quota-remaining"],
            (4 - i).to_string().as_str()
        );
    }

    let response = app.predict(TEST_USER_ID, "MSFT").await;
    response.assert_status(StatusCode::FORBIDDEN);
    let json: Value = response.json();
    assert_eq!(json["error"], "daily limit reached");
    assert_eq!(json["code"], "QUOTA_EXCEEDED");

    let record = app.store.get(TEST_USER_ID).await.unwrap().unwrap();
    assert_eq!(record.daily_count, 5);
}

#[tokio::test]
async fn test_elapsed_window_resets_count() {
    let app = TestApp::spawn().await;
    mock_any_forecast(&app.forecast_api).await;

    for _ in 0..5 {
        app.predict(TEST_USER_ID, "MSFT").await.assert_status_ok();
    }

    let mut record = app.store.get(TEST_USER_ID).await.unwrap().unwrap();
    record.last_reset_date = Utc::now() - Duration::hours(25);
    app.store.put(record).await;

    let response = app.predict(TEST_USER_ID, "MSFT").await;
    response.assert_status_ok();
    assert_eq!(response.headers()["x-quota-remaining"], "4");

    let record = app.store.get(TEST_USER_ID).await.unwrap().unwrap();
    assert_eq!(record.daily_count, 1);
}

#[tokio::test]
async fn test_premium_user_is_not_counted() {
    let app = TestApp::spawn().await;
    mock_any_forecast(&app.forecast_api).await;
    app.seed_premium(PREMIUM_USER_ID, Utc::now() + Duration::days(10))
        .await;

    for _ in 0..8 {
        let response = app.predict(PREMIUM_USER_ID, "NVDA").await;
        response.assert_status_ok();
        assert_eq!(response.headers()["x-quota-plan"], "premium");
        assert_eq!(response.headers()["x-quota-limit"], "unlimited");
    }

    let record = app.store.get(PREMIUM_USER_ID).await.unwrap().unwrap();
    assert_eq!(record.daily_count, 0);
}

#[tokio::test]
async fn test_expired_premium_is_downgraded_once() {
    let app = TestApp::spawn().await;
    mock_any_forecast(&app.forecast_api).await;
    app.seed_premium(PREMIUM_USER_ID, Utc::now() - Duration::hours(1))
        .await;

    let response = app.predict(PREMIUM_USER_ID, "NVDA").await;
    response.assert_status(StatusCode::FORBIDDEN);
    let json: Value = response.json();
    assert_eq!(json["error"], "subscription expired, downgraded");

    let record = app.store.get(PREMIUM_USER_ID).await.unwrap().unwrap();
    assert_eq!(record.subscription_plan_type, PlanType::Free);
    assert_eq!(record.daily_limit, 5);
    assert_eq!(record.daily_count, 1);

    // Now a free user with one request already charged
    let response = app.predict(PREMIUM_USER_ID, "NVDA").await;
    response.assert_status_ok();
    assert_eq!(response.headers()["x-quota-plan"], "free");
    assert_eq!(response.headers()["x-quota-remaining"], "3");
}

#[tokio::test]
async fn test_missing_user_header_is_rejected() {
    let app = TestApp::spawn().await;

    let response = app
        .server
        .get("/prediction")
        .add_query_param("ticker", "AAPL")
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let json: Value = response.json();
    assert_eq!(json["code"], "BAD_REQUEST");
    assert!(app.store.is_empty().await);
}

#[tokio::test]
async fn test_missing_ticker_is_rejected_without_charging() {
    let app = TestApp::spawn().await;

    let response = app
        .server
        .get("/prediction")
        .add_header(USER_HEADER.parse().unwrap(), TEST_USER_ID.parse().unwrap())
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let json: Value = response.json();
    assert_eq!(json["error"], "Ticker parameter is required");
    assert!(app.store.get(TEST_USER_ID).await.unwrap().is_none());
}

#[tokio::test]
async fn test_invalid_ticker_is_rejected() {
    let app = TestApp::spawn().await;

    let response = app.predict(TEST_USER_ID, "AAPL;DROP").await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let json: Value = response.json();
    assert_eq!(json["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_forecaster_failure_returns_500() {
    let app = TestApp::spawn().await;
    mock_forecast_failure(&app.forecast_api).await;

    let response = app.predict(TEST_USER_ID, "TSLA").await;

    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    let json: Value = response.json();
    assert_eq!(json["code"], "UPSTREAM_ERROR");

    // The failed forecast still counted against the quota
    let record = app.store.get(TEST_USER_ID).await.unwrap().unwrap();
    assert_eq!(record.daily_count, 1);
}
