//! Prediction module
//!
//! Ticker validation, the forecasting client and the per-ticker result cache.

pub mod cache;
pub mod forecaster;
pub mod service;
pub mod ticker;

pub use cache::PredictionCache;
pub use forecaster::{Forecast, Forecaster, HttpForecaster};
pub use service::{CacheStatus, PredictionResult, PredictionService};
pub use ticker::normalize_ticker;
