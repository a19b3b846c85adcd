//! Usage records module
//!
//! Per-user usage records and the stores that persist them.

pub mod memory_store;
pub mod record;
pub mod redis_store;
pub mod store;

pub use memory_store::InMemoryUsageStore;
pub use record::{GetOrCreate, PlanType, SubscriptionChange, UsageRecord, UNLIMITED};
pub use redis_store::RedisUsageStore;
pub use store::UsageStore;
