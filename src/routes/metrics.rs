//! Prometheus metrics endpoint
//!
//! Exposes application metrics in Prometheus format for monitoring.

use axum::response::IntoResponse;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::Lazy;

use crate::prediction::CacheStatus;

/// Global Prometheus handle for metrics export
static PROMETHEUS_HANDLE: Lazy<PrometheusHandle> = Lazy::new(|| {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder")
});

/// Initialize metrics (call once at startup)
pub fn init_metrics() {
    let _ = &*PROMETHEUS_HANDLE;
    register_metrics();
}

fn register_metrics() {
    metrics::describe_counter!(
        "augur_requests_total",
        "Total number of API requests by endpoint and status"
    );
    metrics::describe_counter!(
        "augur_prediction_cache_total",
        "Prediction cache lookups by result"
    );
    metrics::describe_counter!(
        "augur_quota_decisions_total",
        "Quota gate decisions by outcome and reason"
    );
    metrics::describe_counter!(
        "augur_relay_events_total",
        "Subscription events handled by the relay"
    );
    metrics::describe_histogram!(
        "augur_forecast_duration_seconds",
        "Time spent waiting on the forecasting service"
    );
}

/// Prometheus metrics endpoint handler
pub async fn prometheus_metrics() -> impl IntoResponse {
    PROMETHEUS_HANDLE.render()
}

/// Record a handled request
pub fn record_request(endpoint: &'static str, status: u16) {
    metrics::counter!(
        "augur_requests_total",
        "endpoint" => endpoint,
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record a prediction cache lookup
pub fn record_cache_result(status: CacheStatus) {
    let result = match status {
        CacheStatus::Hit => "hit",
        CacheStatus::Miss => "miss",
    };
    metrics::counter!("augur_prediction_cache_total", "result" => result).increment(1);
}

/// Record a quota gate decision
pub fn record_quota_decision(decision: &'static str, reason: &'static str) {
    metrics::counter!(
        "augur_quota_decisions_total",
        "decision" => decision,
        "reason" => reason
    )
    .increment(1);
}

/// Record a relay outcome
pub fn record_relay_event(outcome: &'static str, reason: &'static str) {
    metrics::counter!(
        "augur_relay_events_total",
        "outcome" => outcome,
        "reason" => reason
    )
    .increment(1);
}

/// Record how long a forecast took
pub fn record_forecast_duration(duration_secs: f64) {
    metrics::histogram!("augur_forecast_duration_seconds").record(duration_secs);
}
