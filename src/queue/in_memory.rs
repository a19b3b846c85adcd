//! In-memory queue
//!
//! A process-local stand-in for Redis Streams, used by tests and by local
//! runs without Redis. Entries read by a consumer stay pending until acked;
//! a new consumer on the same stream gets the pending entries first.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use crate::error::{AppError, AppResult};

use super::{Delivery, EventPublisher, EventSource};

#[derive(Default)]
struct StreamBuffer {
    ready: VecDeque<Delivery>,
    pending: BTreeMap<u64, Delivery>,
}

struct Inner {
    streams: Mutex<HashMap<String, StreamBuffer>>,
    notify: Notify,
    next_id: AtomicU64,
    closed: AtomicBool,
}

/// Shared handle to an in-memory queue
#[derive(Clone)]
pub struct InMemoryQueue {
    inner: Arc<Inner>,
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                streams: Mutex::new(HashMap::new()),
                notify: Notify::new(),
                next_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Consumer over `stream`, blocking up to `block` when nothing is ready
    pub fn consumer(&self, stream: &str, block: Duration, batch_size: usize) -> InMemoryConsumer {
        InMemoryConsumer {
            queue: self.clone(),
            stream: stream.to_string(),
            block,
            batch_size: batch_size.max(1),
            pending_drained: false,
        }
    }

    /// Simulate losing the broker: every later poll and publish fails
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Entries not yet read on `stream`
    pub async fn ready_len(&self, stream: &str) -> usize {
        self.inner
            .streams
            .lock()
            .await
            .get(stream)
            .map(|b| b.ready.len())
            .unwrap_or(0)
    }

    /// Entries read but not acknowledged on `stream`
    pub async fn pending_len(&self, stream: &str) -> usize {
        self.inner
            .streams
            .lock()
            .await
            .get(stream)
            .map(|b| b.pending.len())
            .unwrap_or(0)
    }

    /// Copy of every unread payload on `stream`, oldest first
    pub async fn peek(&self, stream: &str) -> Vec<Vec<u8>> {
        self.inner
            .streams
            .lock()
            .await
            .get(stream)
            .map(|b| b.ready.iter().map(|d| d.payload.clone()).collect())
            .unwrap_or_default()
    }

    fn ensure_open(&self) -> AppResult<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(AppError::QueueError("queue connection closed".to_string()));
        }
        Ok(())
    }

    async fn push(&self, stream: &str, payload: Vec<u8>) -> AppResult<String> {
        self.ensure_open()?;
        let seq = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let id = format!("{}-0", seq);
        self.inner
            .streams
            .lock()
            .await
            .entry(stream.to_string())
            .or_default()
            .ready
            .push_back(Delivery {
                id: id.clone(),
                payload,
            });
        self.inner.notify.notify_one();
        Ok(id)
    }
}

#[async_trait]
impl EventPublisher for InMemoryQueue {
    async fn publish(&self, stream: &str, payload: &str) -> AppResult<String> {
        self.push(stream, payload.as_bytes().to_vec()).await
    }
}

/// Consumer half of [`InMemoryQueue`]
pub struct InMemoryConsumer {
    queue: InMemoryQueue,
    stream: String,
    block: Duration,
    batch_size: usize,
    pending_drained: bool,
}

impl InMemoryConsumer {
    async fn take_batch(&mut self) -> Vec<Delivery> {
        let mut streams = self.queue.inner.streams.lock().await;
        let buffer = streams.entry(self.stream.clone()).or_default();

        if !self.pending_drained {
            self.pending_drained = true;
            if !buffer.pending.is_empty() {
                return buffer
                    .pending
                    .values()
                    .take(self.batch_size)
                    .cloned()
                    .collect();
            }
        }

        let mut batch = Vec::new();
        while batch.len() < self.batch_size {
            let Some(delivery) = buffer.ready.pop_front() else {
                break;
            };
            if let Some(seq) = parse_seq(&delivery.id) {
                buffer.pending.insert(seq, delivery.clone());
            }
            batch.push(delivery);
        }
        batch
    }

    /// Append a raw payload to this consumer's stream (test seeding)
    pub async fn push_raw(&self, payload: &[u8]) -> AppResult<String> {
        self.queue.push(&self.stream, payload.to_vec()).await
    }
}

fn parse_seq(id: &str) -> Option<u64> {
    id.split('-').next().and_then(|s| s.parse().ok())
}

#[async_trait]
impl EventSource for InMemoryConsumer {
    async fn poll(&mut self) -> AppResult<Vec<Delivery>> {
        self.queue.ensure_open()?;

        let batch = self.take_batch().await;
        if !batch.is_empty() {
            return Ok(batch);
        }

        // Nothing ready: wait for a publish or the block timeout
        let _ = tokio::time::timeout(self.block, self.queue.inner.notify.notified()).await;
        self.queue.ensure_open()?;
        Ok(self.take_batch().await)
    }

    async fn ack(&mut self, id: &str) -> AppResult<()> {
        self.queue.ensure_open()?;
        if let Some(seq) = parse_seq(id) {
            if let Some(buffer) = self.queue.inner.streams.lock().await.get_mut(&self.stream) {
                buffer.pending.remove(&seq);
            }
        }
        Ok(())
    }
}
