//! Test event trigger
//!
//! `POST /test/prediction` publishes a synthetic prediction request onto the
//! test stream so queue consumers can be exercised end to end.

use std::sync::Arc;

use axum::{body::Bytes, extract::State, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::{
    error::{AppError, AppResult},
    prediction::normalize_ticker,
    routes::metrics::record_request,
    AppState,
};

/// Request body of `POST /test/prediction`
#[derive(Debug, Deserialize)]
pub struct TestPredictionRequest {
    pub user_id: Option<String>,
    pub ticker: Option<String>,
}

/// Event published to the test stream
#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TestPredictionEvent {
    pub user_id: String,
    pub ticker: String,
    pub requested_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct TestPredictionResponse {
    pub success: bool,
    pub message_id: String,
}

/// Handle test prediction triggers
pub async fn trigger_test_prediction(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> AppResult<Json<TestPredictionResponse>> {
    let result = publish_test_prediction(&state, &body).await;

    let status = match &result {
        Ok(_) => 200,
        Err(e) => e.status_code().as_u16(),
    };
    record_request("test_prediction", status);

    result.map(Json)
}

async fn publish_test_prediction(
    state: &AppState,
    body: &[u8],
) -> AppResult<TestPredictionResponse> {
    let request: TestPredictionRequest = serde_json::from_slice(body)
        .map_err(|e| AppError::BadRequest(format!("Invalid request body: {}", e)))?;

    let user_id = request
        .user_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::BadRequest("user_id is required".to_string()))?
        .to_string();
    let ticker = normalize_ticker(request.ticker.as_deref())?;

    let event = TestPredictionEvent {
        user_id,
        ticker,
        requested_at: Utc::now(),
    };
    let payload = serde_json::to_string(&event)?;

    let stream = &state.config.test_prediction_stream;
    let message_id = state
        .publisher
        .publish(stream, &payload)
        .await
        .map_err(|e| {
            error!(error = %e, stream = %stream, "Failed to publish test prediction");
            AppError::QueueError(format!("failed to publish test prediction: {}", e))
        })?;

    info!(
        user_id = %event.user_id,
        ticker = %event.ticker,
        message_id = %message_id,
        "Published test prediction"
    );

    Ok(TestPredictionResponse {
        success: true,
        message_id,
    })
}
