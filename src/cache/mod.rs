//! Cache module
//!
//! Key-value caching for forecast results, backed by Redis or memory.

pub mod in_memory;
pub mod redis;

pub use self::in_memory::InMemoryCache;
pub use self::redis::RedisCache;
