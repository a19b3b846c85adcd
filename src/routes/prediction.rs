//! Prediction endpoint
//!
//! `GET /prediction?ticker=` runs the quota gate for the caller and then
//! serves a cached or freshly computed forecast.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Query, State},
    http::{HeaderMap, HeaderName, HeaderValue},
    response::{IntoResponse, Response},
    Extension, Json,
};
use chrono::Utc;
use serde::Deserialize;
use tracing::info;

use crate::{
    error::AppResult,
    middleware::identity::RequestUser,
    prediction::normalize_ticker,
    quota::QuotaStatus,
    routes::metrics::record_request,
    AppState,
};

pub const HEADER_QUOTA_PLAN: &str = "x-quota-plan";
pub const HEADER_QUOTA_LIMIT: &str = "x-quota-limit";
pub const HEADER_QUOTA_REMAINING: &str = "x-quota-remaining";
pub const HEADER_QUOTA_RESET: &str = "x-quota-reset";
pub const HEADER_CACHE: &str = "x-cache";

/// Query string of `GET /prediction`
#[derive(Debug, Deserialize)]
pub struct PredictionQuery {
    pub ticker: Option<String>,
}

/// Handle prediction requests
pub async fn get_prediction(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<RequestUser>,
    Query(query): Query<PredictionQuery>,
) -> AppResult<Response> {
    let result = serve_prediction(&state, &user, query).await;

    let status = match &result {
        Ok(response) => response.status().as_u16(),
        Err(e) => e.status_code().as_u16(),
    };
    record_request("prediction", status);

    result
}

async fn serve_prediction(
    state: &AppState,
    user: &RequestUser,
    query: PredictionQuery,
) -> AppResult<Response> {
    let start_time = Instant::now();

    let ticker = normalize_ticker(query.ticker.as_deref())?;

    let quota = state
        .quota_gate
        .check(&user.user_id, Utc::now())
        .await?
        .into_result()?;

    let (prediction, cache_status) = state.predictions.predict(&ticker).await?;

    info!(
        user_id = %user.user_id,
        ticker = %ticker,
        cache = cache_status.as_str(),
        duration_ms = %format!("{:.2}", start_time.elapsed().as_secs_f64() * 1000.0),
        "Prediction served"
    );

    let mut headers = quota_headers(&quota);
    headers.insert(
        HeaderName::from_static(HEADER_CACHE),
        HeaderValue::from_static(cache_status.as_str()),
    );

    Ok((headers, Json(prediction)).into_response())
}

/// Response headers describing the caller's quota after this request
pub fn quota_headers(status: &QuotaStatus) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        HeaderName::from_static(HEADER_QUOTA_PLAN),
        HeaderValue::from_static(status.plan.as_str()),
    );

    let limit = status
        .limit
        .map(|l| l.to_string())
        .unwrap_or_else(|| "unlimited".to_string());
    let remaining = status
        .remaining
        .map(|r| r.to_string())
        .unwrap_or_else(|| "unlimited".to_string());

    for (name, value) in [(HEADER_QUOTA_LIMIT, limit), (HEADER_QUOTA_REMAINING, remaining)] {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(HeaderName::from_static(name), value);
        }
    }

    if let Some(resets_at) = status.resets_at {
        if let Ok(value) = HeaderValue::from_str(&resets_at.to_rfc3339()) {
            headers.insert(HeaderName::from_static(HEADER_QUOTA_RESET), value);
        }
    }

    headers
}
