//! In-memory usage store
//!
//! Same semantics as the Redis store, kept behind a single lock. Used by the
//! test suite and by local runs with `AUGUR_STORE_BACKEND=memory`.

use std::collections::HashMap;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::{AppError, AppResult};

use super::record::{GetOrCreate, PlanType, SubscriptionChange, UsageRecord};
use super::store::UsageStore;

/// Usage store backed by a `HashMap`
#[derive(Default)]
pub struct InMemoryUsageStore {
    records: RwLock<HashMap<String, UsageRecord>>,
}

impl InMemoryUsageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a whole record (test seeding)
    pub async fn put(&self, record: UsageRecord) {
        self.records
            .write()
            .await
            .insert(record.user_id.clone(), record);
    }

    /// Number of stored records
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

fn missing(user_id: &str) -> AppError {
    AppError::Internal(anyhow!("no usage record for user '{}'", user_id))
}

#[async_trait]
impl UsageStore for InMemoryUsageStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, user_id: &str) -> AppResult<Option<UsageRecord>> {
        Ok(self.records.read().await.get(user_id).cloned())
    }

    async fn get_or_create(&self, user_id: &str, defaults: UsageRecord) -> AppResult<GetOrCreate> {
        let mut records = self.records.write().await;
        if let Some(existing) = records.get(user_id) {
            return Ok(GetOrCreate::Existing(existing.clone()));
        }
        records.insert(user_id.to_string(), defaults.clone());
        Ok(GetOrCreate::Created(defaults))
    }

    async fn increment_daily_count(&self, user_id: &str, delta: i64) -> AppResult<i64> {
        let mut records = self.records.write().await;
        let record = records.get_mut(user_id).ok_or_else(|| missing(user_id))?;
        record.daily_count += delta;
        record.updated_at = Utc::now();
        Ok(record.daily_count)
    }

    async fn reset_daily_count(
        &self,
        user_id: &str,
        expected_last_reset: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let mut records = self.records.write().await;
        let record = records.get_mut(user_id).ok_or_else(|| missing(user_id))?;
        if record.last_reset_date != expected_last_reset {
            return Ok(false);
        }
        record.daily_count = 0;
        record.last_reset_date = now;
        record.updated_at = now;
        Ok(true)
    }

    async fn downgrade_to_free(
        &self,
        user_id: &str,
        expected_end: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        free_limit: i64,
    ) -> AppResult<bool> {
        let mut records = self.records.write().await;
        let record = records.get_mut(user_id).ok_or_else(|| missing(user_id))?;
        if record.subscription_plan_type != PlanType::Premium
            || record.subscription_end_date != expected_end
        {
            return Ok(false);
        }
        record.subscription_plan_type = PlanType::Free;
        record.daily_limit = free_limit;
        record.daily_count = 1;
        record.last_reset_date = now;
        record.updated_at = now;
        Ok(true)
    }

    async fn upsert_subscription(
        &self,
        change: &SubscriptionChange,
        daily_limit: i64,
        now: DateTime<Utc>,
        defaults: UsageRecord,
    ) -> AppResult<()> {
        let mut records = self.records.write().await;
        let record = records
            .entry(change.user_id.clone())
            .or_insert(defaults);

        record.subscription_plan_id = Some(change.plan_id.clone());
        record.subscription_plan_type = change.plan_type;
        record.subscription_start_date = Some(change.start_date);
        record.subscription_end_date = Some(change.end_date);
        record.daily_limit = daily_limit;
        record.updated_at = now;
        Ok(())
    }

    async fn ping(&self) -> AppResult<()> {
        Ok(())
    }
}
