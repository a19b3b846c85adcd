//! Usage lookup endpoint
//!
//! Read-only view of the caller's usage record. Looking up a user never
//! creates a record or charges quota.

use std::sync::Arc;

use axum::{extract::State, Extension, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    error::{AppError, AppResult},
    middleware::identity::RequestUser,
    usage::UsageRecord,
    AppState,
};

/// `GET /usage` response
#[derive(Debug, Serialize)]
pub struct UsageResponse {
    #[serde(flatten)]
    pub record: UsageRecord,
    /// Requests left in the current window, absent for unlimited plans
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_reset: Option<DateTime<Utc>>,
}

/// Return the caller's usage record
pub async fn get_usage(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<RequestUser>,
) -> AppResult<Json<UsageResponse>> {
    let record = state
        .store
        .get(&user.user_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No usage recorded for user {}", user.user_id)))?;

    let next_reset = if record.is_unlimited() {
        None
    } else {
        Some(record.next_reset(state.quota_gate.policy().reset_window))
    };

    Ok(Json(UsageResponse {
        remaining: record.remaining(),
        next_reset,
        record,
    }))
}
