//! HTTP routes for Augur
//!
//! This module defines all HTTP endpoints exposed by the API.

pub mod health;
pub mod metrics;
pub mod prediction;
pub mod test_events;
pub mod usage;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{middleware::identity::identity_middleware, AppState};

/// Create the main application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Routes charged to, or scoped by, the calling user
    let user_routes = Router::new()
        .route("/prediction", get(prediction::get_prediction))
        .route("/usage", get(usage::get_usage))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            identity_middleware,
        ));

    let public_routes = Router::new()
        .route("/test/prediction", post(test_events::trigger_test_prediction))
        .route("/health", get(health::health_check))
        .route("/health/ready", get(health::readiness_check))
        .route("/health/live", get(health::liveness_check))
        .route("/metrics", get(metrics::prometheus_metrics));

    Router::new()
        .merge(public_routes)
        .merge(user_routes)
        // Global middleware (applied to all routes)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
