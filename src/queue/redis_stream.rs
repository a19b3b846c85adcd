//! Redis Streams queue
//!
//! Events are stream entries with the JSON body under the `value` field.
//! The consumer reads through a consumer group and acknowledges with XACK,
//! giving at-least-once delivery: anything read but not acknowledged stays
//! in the group's pending list and is read again on the next start.

use async_trait::async_trait;
use redis::{
    streams::{StreamReadOptions, StreamReadReply},
    AsyncCommands,
};
use tracing::{debug, info, instrument};

use crate::error::AppResult;

use super::{Delivery, EventPublisher, EventSource};

/// Field holding the message body
const VALUE_FIELD: &str = "value";

/// Name stamped on every published message
const SERVICE_ORIGIN: &str = "augur";

/// Publishes messages with XADD
pub struct RedisStreamPublisher {
    conn: redis::aio::ConnectionManager,
}

impl RedisStreamPublisher {
    pub fn new(conn: redis::aio::ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl EventPublisher for RedisStreamPublisher {
    #[instrument(skip(self, payload), fields(stream = %stream))]
    async fn publish(&self, stream: &str, payload: &str) -> AppResult<String> {
        let mut conn = self.conn.clone();
        let message_id = uuid::Uuid::new_v4().to_string();
        let items = [
            (VALUE_FIELD, payload.to_string()),
            ("message_id", message_id.clone()),
            ("service_origin", SERVICE_ORIGIN.to_string()),
            ("timestamp", chrono::Utc::now().timestamp_millis().to_string()),
        ];

        let entry_id: String = conn.xadd(stream, "*", &items).await?;
        debug!(entry_id = %entry_id, message_id = %message_id, "Published message");
        Ok(entry_id)
    }
}

/// Consumer-group reader over one stream
pub struct RedisStreamConsumer {
    conn: redis::aio::ConnectionManager,
    stream: String,
    group: String,
    consumer: String,
    block_ms: usize,
    batch_size: usize,
    /// Set once this consumer's backlog of unacknowledged entries is empty
    pending_drained: bool,
}

impl RedisStreamConsumer {
    /// Connect a consumer, creating the group (and stream) if needed
    ///
    /// The connection should be dedicated to this consumer, since blocking
    /// reads hold it for up to `block_ms`.
    pub async fn connect(
        conn: redis::aio::ConnectionManager,
        stream: &str,
        group: &str,
        consumer: &str,
        block_ms: u64,
        batch_size: usize,
    ) -> AppResult<Self> {
        let mut this = Self {
            conn,
            stream: stream.to_string(),
            group: group.to_string(),
            consumer: consumer.to_string(),
            block_ms: block_ms as usize,
            batch_size: batch_size.max(1),
            pending_drained: false,
        };
        this.ensure_group().await?;
        Ok(this)
    }

    async fn ensure_group(&mut self) -> AppResult<()> {
        // Start from the beginning so events published before the first
        // relay start are not skipped.
        let created: redis::RedisResult<()> = self
            .conn
            .xgroup_create_mkstream(&self.stream, &self.group, "0")
            .await;

        match created {
            Ok(()) => {
                info!(stream = %self.stream, group = %self.group, "Created consumer group");
                Ok(())
            }
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn to_deliveries(reply: StreamReadReply) -> Vec<Delivery> {
        reply
            .keys
            .into_iter()
            .flat_map(|key| key.ids)
            .map(|entry| Delivery {
                payload: entry.get::<Vec<u8>>(VALUE_FIELD).unwrap_or_default(),
                id: entry.id,
            })
            .collect()
    }
}

#[async_trait]
impl EventSource for RedisStreamConsumer {
    async fn poll(&mut self) -> AppResult<Vec<Delivery>> {
        let opts = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .count(self.batch_size);

        if !self.pending_drained {
            // "0" re-reads entries delivered to this consumer but never acked
            let reply: StreamReadReply = self
                .conn
                .xread_options(&[&self.stream], &["0"], &opts)
                .await?;
            let deliveries = Self::to_deliveries(reply);
            if !deliveries.is_empty() {
                debug!(count = deliveries.len(), "Redelivering pending entries");
                return Ok(deliveries);
            }
            self.pending_drained = true;
        }

        let reply: StreamReadReply = self
            .conn
            .xread_options(&[&self.stream], &[">"], &opts.block(self.block_ms))
            .await?;
        Ok(Self::to_deliveries(reply))
    }

    async fn ack(&mut self, id: &str) -> AppResult<()> {
        let _: i64 = self.conn.xack(&self.stream, &self.group, &[id]).await?;
        Ok(())
    }
}
