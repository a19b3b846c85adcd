//! Caller identity middleware
//!
//! Authentication happens upstream of this service; the gateway forwards the
//! caller's id in a header (`X-User-Id` by default).

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use tracing::{debug, instrument};

use crate::{error::AppError, AppState};

/// Identified caller, added to request extensions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestUser {
    pub user_id: String,
}

/// Read the caller id from `header_name`, ignoring blank values
pub fn extract_user_id(headers: &HeaderMap, header_name: &str) -> Option<String> {
    headers
        .get(header_name)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

/// Identity middleware
///
/// Rejects the request with 400 when the user header is missing or empty,
/// otherwise inserts a `RequestUser` for the handlers.
#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn identity_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let header_name = &state.config.user_id_header;
    let user_id = extract_user_id(request.headers(), header_name).ok_or_else(|| {
        AppError::BadRequest(format!("Missing or empty {} header", header_name))
    })?;

    debug!(user_id = %user_id, "Caller identified");
    request.extensions_mut().insert(RequestUser { user_id });

    Ok(next.run(request).await)
}
