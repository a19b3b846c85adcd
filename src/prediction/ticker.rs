//! Ticker symbol validation

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{AppError, AppResult};

/// Exchange symbols, including share classes (`BRK.B`) and futures or
/// forex suffixes (`ES=F`, `EURUSD=X`)
static TICKER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Z0-9][A-Z0-9.\-^=]{0,14}$").expect("ticker regex is valid")
});

/// Trim and uppercase a ticker, rejecting missing or malformed symbols
pub fn normalize_ticker(raw: Option<&str>) -> AppResult<String> {
    let trimmed = raw.map(str::trim).unwrap_or_default();
    if trimmed.is_empty() {
        return Err(AppError::BadRequest(
            "Ticker parameter is required".to_string(),
        ));
    }

    let ticker = trimmed.to_ascii_uppercase();
    if !TICKER_RE.is_match(&ticker) {
        return Err(AppError::BadRequest(format!(
            "Invalid ticker symbol '{}'",
            trimmed
        )));
    }

    Ok(ticker)
}
