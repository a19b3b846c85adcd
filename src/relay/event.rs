//! Subscription event decoding and validation

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::usage::{PlanType, SubscriptionChange};

/// Event as it arrives on the queue; every field is optional until validated
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSubscriptionEvent {
    #[serde(default)]
    pub user_id: Option<Value>,
    #[serde(default)]
    pub subscription_plan_id: Option<Value>,
    #[serde(default)]
    pub start_date: Option<Value>,
    #[serde(default)]
    pub end_date: Option<Value>,
    #[serde(default)]
    pub subscription_plan_type: Option<Value>,
}

/// Why an event was dropped instead of applied
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DropReason {
    /// Not a JSON object
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error("missing field '{0}'")]
    MissingField(&'static str),
    #[error("field '{0}' is not a valid date")]
    InvalidDate(&'static str),
    #[error("unknown subscription plan type '{0}'")]
    UnknownPlanType(String),
}

impl DropReason {
    /// Low-cardinality label for metrics
    pub fn label(&self) -> &'static str {
        match self {
            DropReason::InvalidPayload(_) => "invalid_payload",
            DropReason::MissingField(_) => "missing_field",
            DropReason::InvalidDate(_) => "invalid_date",
            DropReason::UnknownPlanType(_) => "unknown_plan_type",
        }
    }
}

/// Scalar field as text; null, empty strings and containers count as absent
fn text(value: &Option<Value>) -> Option<String> {
    match value.as_ref()? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parse the timestamp shapes producers are known to send
///
/// RFC 3339, naive date-times taken as UTC, or a bare date taken as
/// midnight UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Decode and validate a queue payload
///
/// Checks run in a fixed order: presence of all five fields, then the two
/// dates, then the plan type. The first failure wins.
pub fn parse_event(payload: &[u8]) -> Result<SubscriptionChange, DropReason> {
    let value: Value = serde_json::from_slice(payload)
        .map_err(|e| DropReason::InvalidPayload(e.to_string()))?;
    if !value.is_object() {
        return Err(DropReason::InvalidPayload("expected a JSON object".to_string()));
    }
    let raw: RawSubscriptionEvent = serde_json::from_value(value)
        .map_err(|e| DropReason::InvalidPayload(e.to_string()))?;

    let user_id = text(&raw.user_id).ok_or(DropReason::MissingField("userId"))?;
    let plan_id =
        text(&raw.subscription_plan_id).ok_or(DropReason::MissingField("subscriptionPlanId"))?;
    let start = text(&raw.start_date).ok_or(DropReason::MissingField("startDate"))?;
    let end = text(&raw.end_date).ok_or(DropReason::MissingField("endDate"))?;
    let plan_type =
        text(&raw.subscription_plan_type).ok_or(DropReason::MissingField("subscriptionPlanType"))?;

    let start_date = parse_timestamp(&start).ok_or(DropReason::InvalidDate("startDate"))?;
    let end_date = parse_timestamp(&end).ok_or(DropReason::InvalidDate("endDate"))?;

    let plan_type: PlanType = plan_type
        .parse()
        .map_err(|_| DropReason::UnknownPlanType(plan_type.clone()))?;

    Ok(SubscriptionChange {
        user_id,
        plan_id,
        plan_type,
        start_date,
        end_date,
    })
}
