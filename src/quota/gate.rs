//! Subscription-aware quota gate
//!
//! Decides whether a prediction request may proceed, based on the caller's
//! usage record. Free plans are capped per reset window; premium plans are
//! uncapped until their end date, after which they fall back to free.

use std::sync::Arc;

use anyhow::anyhow;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, instrument, warn};

use crate::{
    config::Config,
    error::{AppError, AppResult},
    routes::metrics,
    usage::{GetOrCreate, PlanType, UsageRecord, UsageStore},
};

/// Re-reads allowed when conditional writes keep losing to other requests
const MAX_STALE_READS: usize = 4;

/// Quota parameters
#[derive(Debug, Clone)]
pub struct QuotaPolicy {
    /// Daily cap for free plans
    pub free_daily_limit: i64,
    /// Length of a free-plan window
    pub reset_window: Duration,
    /// Plan window given to records created on first request
    pub default_plan_days: i64,
}

impl QuotaPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            free_daily_limit: config.free_daily_limit,
            reset_window: Duration::seconds(config.quota_reset_window_seconds),
            default_plan_days: config.default_plan_days,
        }
    }

    /// Record created for a user seen for the first time
    pub fn default_record(&self, user_id: &str, now: DateTime<Utc>) -> UsageRecord {
        UsageRecord::new_default(user_id, now, self.free_daily_limit, self.default_plan_days)
    }
}

impl Default for QuotaPolicy {
    fn default() -> Self {
        Self {
            free_daily_limit: 5,
            reset_window: Duration::hours(24),
            default_plan_days: 30,
        }
    }
}

/// Usage snapshot after an allowed request
#[derive(Debug, Clone, PartialEq)]
pub struct QuotaStatus {
    pub plan: PlanType,
    /// Requests consumed in the current window, this one included
    pub used: i64,
    /// `None` when the plan is unlimited
    pub limit: Option<i64>,
    pub remaining: Option<i64>,
    /// End of the current window for counted plans
    pub resets_at: Option<DateTime<Utc>>,
}

/// Why a request was refused
#[derive(Debug, Clone, PartialEq)]
pub enum DenyReason {
    DailyLimitReached {
        limit: i64,
        used: i64,
        resets_at: DateTime<Utc>,
    },
    SubscriptionExpired {
        expired_at: Option<DateTime<Utc>>,
    },
}

impl DenyReason {
    pub fn message(&self) -> &'static str {
        match self {
            DenyReason::DailyLimitReached { .. } => "daily limit reached",
            DenyReason::SubscriptionExpired { .. } => "subscription expired, downgraded",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            DenyReason::DailyLimitReached { .. } => "daily_limit",
            DenyReason::SubscriptionExpired { .. } => "expired",
        }
    }
}

/// Gate verdict
#[derive(Debug, Clone, PartialEq)]
pub enum QuotaDecision {
    Allow(QuotaStatus),
    Deny(DenyReason),
}

impl QuotaDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, QuotaDecision::Allow(_))
    }

    /// Turn a denial into the error surfaced to HTTP callers
    pub fn into_result(self) -> AppResult<QuotaStatus> {
        match self {
            QuotaDecision::Allow(status) => Ok(status),
            QuotaDecision::Deny(reason) => Err(AppError::QuotaExceeded {
                reason: reason.message().to_string(),
            }),
        }
    }
}

/// Quota gate over an injected usage store
pub struct QuotaGate {
    store: Arc<dyn UsageStore>,
    policy: QuotaPolicy,
}

impl QuotaGate {
    pub fn new(store: Arc<dyn UsageStore>, policy: QuotaPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &QuotaPolicy {
        &self.policy
    }

    /// Check and charge one prediction request for `user_id`
    ///
    /// All writes (creation, reset, increment, downgrade) are persisted
    /// before this returns.
    #[instrument(skip(self, now), fields(user_id = %user_id))]
    pub async fn check(&self, user_id: &str, now: DateTime<Utc>) -> AppResult<QuotaDecision> {
        let decision = self.evaluate(user_id, now).await?;

        match &decision {
            QuotaDecision::Allow(status) => {
                debug!(plan = %status.plan, used = status.used, "Quota check passed");
                metrics::record_quota_decision("allow", status.plan.as_str());
            }
            QuotaDecision::Deny(reason) => {
                info!(reason = reason.message(), "Quota check denied");
                metrics::record_quota_decision("deny", reason.label());
            }
        }

        Ok(decision)
    }

    async fn evaluate(&self, user_id: &str, now: DateTime<Utc>) -> AppResult<QuotaDecision> {
        let defaults = self.policy.default_record(user_id, now);
        let mut record = match self.store.get_or_create(user_id, defaults).await? {
            GetOrCreate::Created(record) => {
                // First request of a new user is charged on the fresh record
                let used = self.store.increment_daily_count(user_id, 1).await?;
                return Ok(QuotaDecision::Allow(self.counted_status(&record, used)));
            }
            GetOrCreate::Existing(record) => record,
        };

        for _ in 0..MAX_STALE_READS {
            let decision = match record.subscription_plan_type {
                PlanType::Free => self.check_free(record, now).await?,
                PlanType::Premium => self.check_premium(record, now).await?,
            };
            if let Some(decision) = decision {
                return Ok(decision);
            }

            debug!("Usage record changed under a conditional write, re-reading");
            record = self.store.get(user_id).await?.ok_or_else(|| {
                AppError::Internal(anyhow!("usage record for '{}' vanished", user_id))
            })?;
        }

        Err(AppError::Internal(anyhow!(
            "usage record for '{}' kept changing during the quota check",
            user_id
        )))
    }

    /// `None` means another request moved the record on first
    async fn check_free(
        &self,
        mut record: UsageRecord,
        now: DateTime<Utc>,
    ) -> AppResult<Option<QuotaDecision>> {
        let user_id = record.user_id.clone();

        if record.reset_due(now, self.policy.reset_window) {
            let applied = self
                .store
                .reset_daily_count(&user_id, record.last_reset_date, now)
                .await?;
            if !applied {
                return Ok(None);
            }
            debug!(last_reset = %record.last_reset_date, "Reset window elapsed");
            record.daily_count = 0;
            record.last_reset_date = now;
        }

        if record.is_unlimited() {
            return Ok(Some(QuotaDecision::Allow(self.uncounted_status(&record))));
        }

        if record.daily_count >= record.daily_limit {
            let used = record.daily_count;
            return Ok(Some(QuotaDecision::Deny(self.limit_reached(&record, used))));
        }

        // Increment first, then compare, so concurrent requests cannot both
        // slip under the limit.
        let used = self.store.increment_daily_count(&user_id, 1).await?;
        if used > record.daily_limit {
            let rolled_back = self.store.increment_daily_count(&user_id, -1).await?;
            return Ok(Some(QuotaDecision::Deny(self.limit_reached(&record, rolled_back))));
        }

        Ok(Some(QuotaDecision::Allow(self.counted_status(&record, used))))
    }

    /// `None` means another request moved the record on first
    async fn check_premium(
        &self,
        record: UsageRecord,
        now: DateTime<Utc>,
    ) -> AppResult<Option<QuotaDecision>> {
        if record.subscription_expired(now) {
            let applied = self
                .store
                .downgrade_to_free(
                    &record.user_id,
                    record.subscription_end_date,
                    now,
                    self.policy.free_daily_limit,
                )
                .await?;
            if !applied {
                return Ok(None);
            }
            warn!(
                user_id = %record.user_id,
                end_date = ?record.subscription_end_date,
                "Premium subscription expired, downgraded to free"
            );
            return Ok(Some(QuotaDecision::Deny(DenyReason::SubscriptionExpired {
                expired_at: record.subscription_end_date,
            })));
        }

        Ok(Some(QuotaDecision::Allow(self.uncounted_status(&record))))
    }

    fn limit_reached(&self, record: &UsageRecord, used: i64) -> DenyReason {
        DenyReason::DailyLimitReached {
            limit: record.daily_limit,
            used,
            resets_at: record.next_reset(self.policy.reset_window),
        }
    }

    fn counted_status(&self, record: &UsageRecord, used: i64) -> QuotaStatus {
        QuotaStatus {
            plan: record.subscription_plan_type,
            used,
            limit: Some(record.daily_limit),
            remaining: Some((record.daily_limit - used).max(0)),
            resets_at: Some(record.next_reset(self.policy.reset_window)),
        }
    }

    fn uncounted_status(&self, record: &UsageRecord) -> QuotaStatus {
        QuotaStatus {
            plan: record.subscription_plan_type,
            used: record.daily_count,
            limit: None,
            remaining: None,
            resets_at: None,
        }
    }
}
