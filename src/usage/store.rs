//! Usage store abstraction
//!
//! The quota gate and the subscription relay both work against this trait,
//! so the backing store can be Redis in production and memory in tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::AppResult;

use super::record::{GetOrCreate, SubscriptionChange, UsageRecord};

/// Storage operations over usage records
///
/// Implementations must make `get_or_create` and `increment_daily_count`
/// atomic with respect to concurrent callers on the same user. Resets and
/// downgrades are compare-and-set writes: they apply only if the record still
/// holds the value the caller read, and report whether they did.
#[async_trait]
pub trait UsageStore: Send + Sync {
    /// Backend name for logging and health checks
    fn name(&self) -> &'static str;

    /// Fetch a record by user id
    async fn get(&self, user_id: &str) -> AppResult<Option<UsageRecord>>;

    /// Fetch a record, inserting `defaults` if the user has none
    async fn get_or_create(&self, user_id: &str, defaults: UsageRecord) -> AppResult<GetOrCreate>;

    /// Add `delta` to the daily count and return the new value
    ///
    /// Fails if the user has no record.
    async fn increment_daily_count(&self, user_id: &str, delta: i64) -> AppResult<i64>;

    /// Zero the daily count and start a new reset window at `now`
    ///
    /// Applies only while the stored reset date is still
    /// `expected_last_reset`.
    async fn reset_daily_count(
        &self,
        user_id: &str,
        expected_last_reset: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> AppResult<bool>;

    /// Move an expired premium record back to the free plan
    ///
    /// Applies only while the record is still premium with the end date
    /// `expected_end`. The count is set to 1 so the request that observed
    /// the expiry is charged against the new free window.
    async fn downgrade_to_free(
        &self,
        user_id: &str,
        expected_end: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        free_limit: i64,
    ) -> AppResult<bool>;

    /// Overwrite the subscription fields of a record
    ///
    /// `defaults` is used only when no record exists yet. The daily count
    /// and reset date of an existing record are left untouched.
    async fn upsert_subscription(
        &self,
        change: &SubscriptionChange,
        daily_limit: i64,
        now: DateTime<Utc>,
        defaults: UsageRecord,
    ) -> AppResult<()>;

    /// Check the backend is reachable
    async fn ping(&self) -> AppResult<()>;
}
