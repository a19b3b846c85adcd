//! Queue module
//!
//! Message-queue plumbing for subscription events: a consumer side used by
//! the relay and a publisher side used by the HTTP test trigger.

pub mod in_memory;
pub mod redis_stream;

use async_trait::async_trait;

use crate::error::AppResult;

pub use in_memory::{InMemoryConsumer, InMemoryQueue};
pub use redis_stream::{RedisStreamConsumer, RedisStreamPublisher};

/// A message handed to a consumer, acknowledged by id once handled
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub id: String,
    pub payload: Vec<u8>,
}

/// Consumer side of a queue
///
/// `poll` may return an empty batch after its block timeout. An `Err` from
/// either method means the queue connection is gone.
#[async_trait]
pub trait EventSource: Send {
    async fn poll(&mut self) -> AppResult<Vec<Delivery>>;

    async fn ack(&mut self, id: &str) -> AppResult<()>;
}

/// Publisher side of a queue
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Append `payload` to `stream`, returning the assigned message id
    async fn publish(&self, stream: &str, payload: &str) -> AppResult<String>;
}
