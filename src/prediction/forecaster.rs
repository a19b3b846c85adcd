//! Forecasting backend
//!
//! The numeric model lives in a separate service; this module only knows
//! how to ask it for a forecast.

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use tracing::{debug, error, instrument};

use crate::{
    config::Config,
    error::{AppError, AppResult},
};

/// Raw forecast for one ticker
#[derive(Debug, Clone, PartialEq)]
pub struct Forecast {
    pub predictions: Vec<f64>,
    pub dates: Vec<NaiveDate>,
    /// Mean absolute percentage error of the model on its holdout
    pub mape: f64,
}

/// Something that can produce a forecast for a ticker
#[async_trait]
pub trait Forecaster: Send + Sync {
    /// Backend name for logging and metrics
    fn name(&self) -> &'static str;

    async fn forecast(&self, ticker: &str) -> AppResult<Forecast>;
}

/// Wire format of the forecasting service
#[derive(Debug, Deserialize)]
struct ForecastResponse {
    predictions: Vec<f64>,
    dates: Vec<String>,
    #[serde(alias = "mape_values")]
    mape: f64,
}

/// Accept `YYYY-MM-DD` optionally followed by a time part
fn parse_forecast_date(raw: &str) -> Option<NaiveDate> {
    let date_part = raw.get(..10)?;
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

/// Forecaster calling the forecasting service over HTTP
pub struct HttpForecaster {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpForecaster {
    /// Create a new forecasting client
    pub fn new(client: reqwest::Client, config: &Config) -> Self {
        Self {
            client,
            base_url: config.forecast_api_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(config.forecast_timeout_seconds),
        }
    }
}

#[async_trait]
impl Forecaster for HttpForecaster {
    fn name(&self) -> &'static str {
        "http"
    }

    #[instrument(skip(self), fields(ticker = %ticker))]
    async fn forecast(&self, ticker: &str) -> AppResult<Forecast> {
        let url = format!("{}/forecast", self.base_url);
        debug!(url = %url, "Requesting forecast");

        let response = self
            .client
            .get(&url)
            .query(&[("ticker", ticker)])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "Forecast request failed");
                AppError::UpstreamError(format!("forecasting service unreachable: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            error!(status = %status, body = %text, "Forecasting service returned an error");
            return Err(AppError::UpstreamError(format!(
                "forecasting service returned {}",
                status
            )));
        }

        let body = response.text().await?;
        let parsed: ForecastResponse = serde_json::from_str(&body).map_err(|e| {
            error!(error = %e, body = %body, "Failed to parse forecast response");
            AppError::UpstreamError(format!("invalid forecast response: {}", e))
        })?;

        let dates = parsed
            .dates
            .iter()
            .map(|raw| {
                parse_forecast_date(raw).ok_or_else(|| {
                    AppError::UpstreamError(format!("invalid forecast date '{}'", raw))
                })
            })
            .collect::<AppResult<Vec<_>>>()?;

        Ok(Forecast {
            predictions: parsed.predictions,
            dates,
            mape: parsed.mape,
        })
    }
}
