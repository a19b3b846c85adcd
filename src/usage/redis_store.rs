//! Redis-backed usage store
//!
//! Each user is a hash under `augur:usage:{user_id}`. Multi-field writes go
//! through `MULTI`/`EXEC` pipelines and counters through `HINCRBY`, so the
//! gate never does a read-then-write on the count. Writes that depend on
//! what the caller read (reset, downgrade) run as Lua scripts that compare
//! before they write.

use std::collections::HashMap;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use redis::{AsyncCommands, Script};
use tracing::{debug, instrument};

use crate::error::{AppError, AppResult};

use super::record::{GetOrCreate, PlanType, SubscriptionChange, UsageRecord};
use super::store::UsageStore;

/// Cache key prefixes
pub mod keys {
    /// Usage record hash key
    pub fn usage_record(user_id: &str) -> String {
        format!("augur:usage:{}", user_id)
    }
}

mod fields {
    pub const USER_ID: &str = "user_id";
    pub const DAILY_COUNT: &str = "daily_count";
    pub const LAST_RESET_DATE: &str = "last_reset_date";
    pub const PLAN_TYPE: &str = "subscription_plan_type";
    pub const DAILY_LIMIT: &str = "daily_limit";
    pub const PLAN_ID: &str = "subscription_plan_id";
    pub const START_DATE: &str = "subscription_start_date";
    pub const END_DATE: &str = "subscription_end_date";
    pub const CREATED_AT: &str = "created_at";
    pub const UPDATED_AT: &str = "updated_at";
}

/// HINCRBY that refuses to create a partial hash for an unknown user
static INCREMENT_EXISTING: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        if redis.call('EXISTS', KEYS[1]) == 0 then
            return false
        end
        local count = redis.call('HINCRBY', KEYS[1], 'daily_count', ARGV[1])
        redis.call('HSET', KEYS[1], 'updated_at', ARGV[2])
        return count
        "#,
    )
});

/// Zero the count if `last_reset_date` is still ARGV[1]
///
/// Returns -1 for a missing record, 0 if the window moved, 1 if reset.
static RESET_IF_UNCHANGED: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        if redis.call('EXISTS', KEYS[1]) == 0 then
            return -1
        end
        if redis.call('HGET', KEYS[1], 'last_reset_date') ~= ARGV[1] then
            return 0
        end
        redis.call('HSET', KEYS[1],
            'daily_count', 0,
            'last_reset_date', ARGV[2],
            'updated_at', ARGV[2])
        return 1
        "#,
    )
});

/// Downgrade if the record is still premium and ends at ARGV[1] ('' for none)
///
/// Returns -1 for a missing record, 0 if it changed, 1 if downgraded.
static DOWNGRADE_IF_UNCHANGED: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        if redis.call('EXISTS', KEYS[1]) == 0 then
            return -1
        end
        local plan = redis.call('HGET', KEYS[1], 'subscription_plan_type')
        local ends = redis.call('HGET', KEYS[1], 'subscription_end_date') or ''
        if plan ~= 'premium' or ends ~= ARGV[1] then
            return 0
        end
        redis.call('HSET', KEYS[1],
            'subscription_plan_type', 'free',
            'daily_limit', ARGV[2],
            'daily_count', 1,
            'last_reset_date', ARGV[3],
            'updated_at', ARGV[3])
        return 1
        "#,
    )
});

fn missing(user_id: &str) -> AppError {
    AppError::Internal(anyhow!("no usage record for user '{}'", user_id))
}

/// Map a compare-and-set script result to whether the write applied
fn applied(user_id: &str, outcome: i64) -> AppResult<bool> {
    match outcome {
        -1 => Err(missing(user_id)),
        0 => Ok(false),
        _ => Ok(true),
    }
}

fn ts(value: DateTime<Utc>) -> String {
    value.to_rfc3339()
}

/// Flatten a record into hash fields, skipping absent optionals
fn to_fields(record: &UsageRecord) -> Vec<(&'static str, String)> {
    let mut out = vec![
        (fields::USER_ID, record.user_id.clone()),
        (fields::DAILY_COUNT, record.daily_count.to_string()),
        (fields::LAST_RESET_DATE, ts(record.last_reset_date)),
        (fields::PLAN_TYPE, record.subscription_plan_type.to_string()),
        (fields::DAILY_LIMIT, record.daily_limit.to_string()),
        (fields::CREATED_AT, ts(record.created_at)),
        (fields::UPDATED_AT, ts(record.updated_at)),
    ];
    if let Some(plan_id) = &record.subscription_plan_id {
        out.push((fields::PLAN_ID, plan_id.clone()));
    }
    if let Some(start) = record.subscription_start_date {
        out.push((fields::START_DATE, ts(start)));
    }
    if let Some(end) = record.subscription_end_date {
        out.push((fields::END_DATE, ts(end)));
    }
    out
}

fn required<'a>(raw: &'a HashMap<String, String>, field: &str) -> AppResult<&'a str> {
    raw.get(field)
        .map(String::as_str)
        .ok_or_else(|| AppError::Internal(anyhow!("usage record is missing field '{}'", field)))
}

fn parse_ts(field: &str, value: &str) -> AppResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AppError::Internal(anyhow!("bad timestamp in '{}': {}", field, e)))
}

fn parse_i64(field: &str, value: &str) -> AppResult<i64> {
    value
        .parse()
        .map_err(|e| AppError::Internal(anyhow!("bad integer in '{}': {}", field, e)))
}

fn optional_ts(raw: &HashMap<String, String>, field: &str) -> AppResult<Option<DateTime<Utc>>> {
    raw.get(field).map(|v| parse_ts(field, v)).transpose()
}

/// Rebuild a record from a hash; an empty hash means no record
fn from_fields(raw: &HashMap<String, String>) -> AppResult<Option<UsageRecord>> {
    if raw.is_empty() {
        return Ok(None);
    }

    let plan_type: PlanType = required(raw, fields::PLAN_TYPE)?
        .parse()
        .map_err(|e| AppError::Internal(anyhow!("{}", e)))?;

    Ok(Some(UsageRecord {
        user_id: required(raw, fields::USER_ID)?.to_string(),
        daily_count: parse_i64(fields::DAILY_COUNT, required(raw, fields::DAILY_COUNT)?)?,
        last_reset_date: parse_ts(
            fields::LAST_RESET_DATE,
            required(raw, fields::LAST_RESET_DATE)?,
        )?,
        subscription_plan_type: plan_type,
        daily_limit: parse_i64(fields::DAILY_LIMIT, required(raw, fields::DAILY_LIMIT)?)?,
        subscription_plan_id: raw.get(fields::PLAN_ID).cloned(),
        subscription_start_date: optional_ts(raw, fields::START_DATE)?,
        subscription_end_date: optional_ts(raw, fields::END_DATE)?,
        created_at: parse_ts(fields::CREATED_AT, required(raw, fields::CREATED_AT)?)?,
        updated_at: parse_ts(fields::UPDATED_AT, required(raw, fields::UPDATED_AT)?)?,
    }))
}

/// Usage store over a Redis connection manager
pub struct RedisUsageStore {
    conn: redis::aio::ConnectionManager,
}

impl RedisUsageStore {
    /// Create a new Redis usage store
    pub fn new(conn: redis::aio::ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl UsageStore for RedisUsageStore {
    fn name(&self) -> &'static str {
        "redis"
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    async fn get(&self, user_id: &str) -> AppResult<Option<UsageRecord>> {
        let mut conn = self.conn.clone();
        let raw: HashMap<String, String> = conn.hgetall(keys::usage_record(user_id)).await?;
        from_fields(&raw)
    }

    #[instrument(skip(self, defaults), fields(user_id = %user_id))]
    async fn get_or_create(&self, user_id: &str, defaults: UsageRecord) -> AppResult<GetOrCreate> {
        let mut conn = self.conn.clone();
        let key = keys::usage_record(user_id);

        // HSETNX on user_id decides who created the record; the remaining
        // fields are filled the same way so a half-written hash is completed.
        let mut pipe = redis::pipe();
        pipe.atomic().hset_nx(&key, fields::USER_ID, user_id);
        for (field, value) in to_fields(&defaults) {
            if field != fields::USER_ID {
                pipe.hset_nx(&key, field, value).ignore();
            }
        }
        pipe.hgetall(&key);

        let (created, raw): (bool, HashMap<String, String>) = pipe.query_async(&mut conn).await?;
        let record = from_fields(&raw)?
            .ok_or_else(|| AppError::Internal(anyhow!("usage record vanished after create")))?;

        if created {
            debug!("Created usage record");
            Ok(GetOrCreate::Created(record))
        } else {
            Ok(GetOrCreate::Existing(record))
        }
    }

    #[instrument(skip(self), fields(user_id = %user_id, delta = delta))]
    async fn increment_daily_count(&self, user_id: &str, delta: i64) -> AppResult<i64> {
        let mut conn = self.conn.clone();

        let count: Option<i64> = INCREMENT_EXISTING
            .key(keys::usage_record(user_id))
            .arg(delta)
            .arg(ts(Utc::now()))
            .invoke_async(&mut conn)
            .await?;

        count.ok_or_else(|| missing(user_id))
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    async fn reset_daily_count(
        &self,
        user_id: &str,
        expected_last_reset: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let mut conn = self.conn.clone();

        let outcome: i64 = RESET_IF_UNCHANGED
            .key(keys::usage_record(user_id))
            .arg(ts(expected_last_reset))
            .arg(ts(now))
            .invoke_async(&mut conn)
            .await?;

        applied(user_id, outcome)
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    async fn downgrade_to_free(
        &self,
        user_id: &str,
        expected_end: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        free_limit: i64,
    ) -> AppResult<bool> {
        let mut conn = self.conn.clone();

        let outcome: i64 = DOWNGRADE_IF_UNCHANGED
            .key(keys::usage_record(user_id))
            .arg(expected_end.map(ts).unwrap_or_default())
            .arg(free_limit)
            .arg(ts(now))
            .invoke_async(&mut conn)
            .await?;

        applied(user_id, outcome)
    }

    #[instrument(skip(self, change, defaults), fields(user_id = %change.user_id))]
    async fn upsert_subscription(
        &self,
        change: &SubscriptionChange,
        daily_limit: i64,
        now: DateTime<Utc>,
        defaults: UsageRecord,
    ) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let key = keys::usage_record(&change.user_id);

        let subscription = [
            (fields::PLAN_ID, change.plan_id.clone()),
            (fields::PLAN_TYPE, change.plan_type.to_string()),
            (fields::START_DATE, ts(change.start_date)),
            (fields::END_DATE, ts(change.end_date)),
            (fields::DAILY_LIMIT, daily_limit.to_string()),
            (fields::UPDATED_AT, ts(now)),
        ];

        let _: () = redis::pipe()
            .atomic()
            .hset_nx(&key, fields::USER_ID, &change.user_id)
            .ignore()
            .hset_nx(&key, fields::DAILY_COUNT, defaults.daily_count)
            .ignore()
            .hset_nx(&key, fields::LAST_RESET_DATE, ts(defaults.last_reset_date))
            .ignore()
            .hset_nx(&key, fields::CREATED_AT, ts(defaults.created_at))
            .ignore()
            .hset_multiple(&key, &subscription)
            .ignore()
            .query_async(&mut conn)
            .await?;

        Ok(())
    }

    async fn ping(&self) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
