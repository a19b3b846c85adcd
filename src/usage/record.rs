//! Usage record model
//!
//! One record per user, tracking daily prediction consumption and the
//! subscription state that decides the daily cap.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Daily limit value meaning "no cap"
pub const UNLIMITED: i64 = -1;

/// Subscription plan tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanType {
    Free,
    Premium,
}

impl PlanType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanType::Free => "free",
            PlanType::Premium => "premium",
        }
    }

    /// Daily limit a plan gets when a subscription event assigns it
    pub fn daily_limit(&self, free_limit: i64) -> i64 {
        match self {
            PlanType::Free => free_limit,
            PlanType::Premium => UNLIMITED,
        }
    }
}

impl fmt::Display for PlanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned for plan names other than `free` / `premium`
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown subscription plan type '{0}'")]
pub struct UnknownPlanType(pub String);

impl FromStr for PlanType {
    type Err = UnknownPlanType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(PlanType::Free),
            "premium" => Ok(PlanType::Premium),
            other => Err(UnknownPlanType(other.to_string())),
        }
    }
}

/// Per-user usage document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub user_id: String,
    pub daily_count: i64,
    pub last_reset_date: DateTime<Utc>,
    pub subscription_plan_type: PlanType,
    /// `-1` means unlimited
    pub daily_limit: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_plan_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_start_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_end_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UsageRecord {
    /// Record handed out to a user seen for the first time
    pub fn new_default(
        user_id: &str,
        now: DateTime<Utc>,
        free_limit: i64,
        plan_days: i64,
    ) -> Self {
        Self {
            user_id: user_id.to_string(),
            daily_count: 0,
            last_reset_date: now,
            subscription_plan_type: PlanType::Free,
            daily_limit: free_limit,
            subscription_plan_id: None,
            subscription_start_date: Some(now),
            subscription_end_date: Some(now + Duration::days(plan_days)),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_unlimited(&self) -> bool {
        self.daily_limit < 0
    }

    /// True once more than `window` has passed since the last reset
    pub fn reset_due(&self, now: DateTime<Utc>, window: Duration) -> bool {
        now > self.last_reset_date + window
    }

    /// A premium plan past its end date, or one that never had an end date
    pub fn subscription_expired(&self, now: DateTime<Utc>) -> bool {
        match self.subscription_plan_type {
            PlanType::Free => false,
            PlanType::Premium => match self.subscription_end_date {
                Some(end) => now > end,
                None => true,
            },
        }
    }

    /// Predictions left in the current window, `None` when unlimited
    pub fn remaining(&self) -> Option<i64> {
        if self.is_unlimited() {
            None
        } else {
            Some((self.daily_limit - self.daily_count).max(0))
        }
    }

    /// Start of the next reset window
    pub fn next_reset(&self, window: Duration) -> DateTime<Utc> {
        self.last_reset_date + window
    }
}

/// Validated subscription change, as applied by the relay
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionChange {
    pub user_id: String,
    pub plan_id: String,
    pub plan_type: PlanType,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

/// Outcome of a get-or-create lookup
#[derive(Debug, Clone, PartialEq)]
pub enum GetOrCreate {
    Existing(UsageRecord),
    Created(UsageRecord),
}

impl GetOrCreate {
    pub fn record(&self) -> &UsageRecord {
        match self {
            GetOrCreate::Existing(r) | GetOrCreate::Created(r) => r,
        }
    }

    pub fn was_created(&self) -> bool {
        matches!(self, GetOrCreate::Created(_))
    }
}
