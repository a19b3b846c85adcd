//! Cached prediction lookups

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::{
    error::{AppError, AppResult},
    routes::metrics,
};

use super::{
    cache::PredictionCache,
    forecaster::{Forecast, Forecaster},
};

/// Forecast as returned to clients and stored in the cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub predictions: Vec<f64>,
    /// Calendar dates formatted `YYYY-MM-DD`
    pub dates: Vec<String>,
    #[serde(rename = "mape_values", alias = "mape")]
    pub mape: f64,
}

impl TryFrom<Forecast> for PredictionResult {
    type Error = AppError;

    fn try_from(forecast: Forecast) -> Result<Self, Self::Error> {
        if forecast.predictions.len() != forecast.dates.len() {
            return Err(AppError::UpstreamError(format!(
                "forecast returned {} predictions for {} dates",
                forecast.predictions.len(),
                forecast.dates.len()
            )));
        }

        Ok(Self {
            predictions: forecast.predictions,
            dates: forecast
                .dates
                .iter()
                .map(|d| d.format("%Y-%m-%d").to_string())
                .collect(),
            mape: forecast.mape,
        })
    }
}

/// Whether a result came from the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
        }
    }
}

/// Read-through cache in front of a forecaster
pub struct PredictionService {
    forecaster: Arc<dyn Forecaster>,
    cache: PredictionCache,
}

impl PredictionService {
    pub fn new(forecaster: Arc<dyn Forecaster>, cache: PredictionCache) -> Self {
        Self { forecaster, cache }
    }

    pub fn cache(&self) -> &PredictionCache {
        &self.cache
    }

    /// Return the cached forecast for `ticker`, computing and storing it on a miss
    ///
    /// `ticker` must already be normalized.
    #[instrument(skip(self), fields(ticker = %ticker, forecaster = self.forecaster.name()))]
    pub async fn predict(&self, ticker: &str) -> AppResult<(PredictionResult, CacheStatus)> {
        match self.cache.get(ticker).await {
            Ok(Some(cached)) => {
                metrics::record_cache_result(CacheStatus::Hit);
                return Ok((cached, CacheStatus::Hit));
            }
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "Prediction cache read failed, treating as miss");
            }
        }
        metrics::record_cache_result(CacheStatus::Miss);

        let started = Instant::now();
        let forecast = self.forecaster.forecast(ticker).await;
        metrics::record_forecast_duration(started.elapsed().as_secs_f64());

        let result = PredictionResult::try_from(forecast?)?;
        info!(points = result.predictions.len(), "Computed new forecast");

        if let Err(e) = self.cache.set(ticker, &result).await {
            warn!(error = %e, "Failed to cache prediction");
        }

        Ok((result, CacheStatus::Miss))
    }
}
