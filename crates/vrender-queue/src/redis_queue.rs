//! Render queue using Redis Streams.

use std::time::Duration;

use async_trait::async_trait;
use redis::streams::{StreamClaimReply, StreamId, StreamPendingCountReply, StreamReadReply};
use redis::AsyncCommands;
use tracing::{debug, info, warn};

use crate::entry::{Delivery, RenderQueueEntry};
use crate::error::{QueueError, QueueResult};
use crate::queue::{FailureOutcome, RenderQueue};

/// Retry counters outlive any sane redelivery window.
const RETRY_COUNTER_TTL_SECS: i64 = 86_400;

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Stream name for render entries
    pub stream_name: String,
    /// Consumer group name
    pub consumer_group: String,
    /// Dead letter queue stream name
    pub dlq_stream_name: String,
    /// Failed deliveries before an entry is dead-lettered
    pub max_retries: u32,
    /// Lifetime of the per-job dedup marker
    pub dedup_ttl: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            stream_name: "vrender:render".to_string(),
            consumer_group: "vrender:workers".to_string(),
            dlq_stream_name: "vrender:dlq".to_string(),
            max_retries: 1,
            dedup_ttl: Duration::from_secs(3600),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            stream_name: std::env::var("QUEUE_STREAM")
                .unwrap_or_else(|_| "vrender:render".to_string()),
            consumer_group: std::env::var("QUEUE_CONSUMER_GROUP")
                .unwrap_or_else(|_| "vrender:workers".to_string()),
            dlq_stream_name: std::env::var("QUEUE_DLQ_STREAM")
                .unwrap_or_else(|_| "vrender:dlq".to_string()),
            max_retries: std::env::var("QUEUE_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1),
            dedup_ttl: Duration::from_secs(
                std::env::var("QUEUE_DEDUP_TTL")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(3600),
            ),
        }
    }
}

/// Render queue client backed by a Redis stream and consumer group.
pub struct RedisStreamQueue {
    client: redis::Client,
    config: QueueConfig,
}

impl RedisStreamQueue {
    /// Create a new queue client.
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    async fn connection(&self) -> QueueResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))
    }

    fn dedup_key(&self, entry: &RenderQueueEntry) -> String {
        format!("{}:dedup:{}", self.config.stream_name, entry.idempotency_key())
    }

    fn retry_key(&self, message_id: &str) -> String {
        format!("{}:retry:{}", self.config.stream_name, message_id)
    }

    /// Decode stream entries, acking any payload that can never be processed.
    async fn parse_entries(&self, ids: Vec<StreamId>) -> Vec<Delivery> {
        let mut deliveries = Vec::with_capacity(ids.len());

        for stream_id in ids {
            let message_id = stream_id.id.clone();
            let parsed = stream_id
                .get::<String>("entry")
                .ok_or_else(|| "missing entry field".to_string())
                .and_then(|payload| {
                    serde_json::from_str::<RenderQueueEntry>(&payload).map_err(|e| e.to_string())
                });

            match parsed {
                Ok(entry) => deliveries.push(Delivery { message_id, entry }),
                Err(e) => {
                    warn!(message_id = %message_id, "Dropping malformed queue entry: {}", e);
                    // Ack the malformed message to prevent reprocessing
                    if let Err(e) = self.remove(&message_id).await {
                        warn!(message_id = %message_id, "Failed to drop malformed entry: {}", e);
                    }
                }
            }
        }

        deliveries
    }

    /// XACK + XDEL a message.
    async fn remove(&self, message_id: &str) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        redis::cmd("XACK")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        redis::cmd("XDEL")
            .arg(&self.config.stream_name)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        Ok(())
    }

    async fn clear_markers(&self, delivery: &Delivery) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        conn.del::<_, ()>(vec![
            self.dedup_key(&delivery.entry),
            self.retry_key(&delivery.message_id),
        ])
        .await?;
        Ok(())
    }

    async fn dead_letter(&self, delivery: &Delivery, error: &str) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(&delivery.entry)?;

        redis::cmd("XADD")
            .arg(&self.config.dlq_stream_name)
            .arg("*")
            .arg("entry")
            .arg(&payload)
            .arg("error")
            .arg(error)
            .arg("original_id")
            .arg(&delivery.message_id)
            .query_async::<()>(&mut conn)
            .await?;

        self.remove(&delivery.message_id).await?;
        self.clear_markers(delivery).await?;

        warn!(
            job_id = %delivery.entry.job_id,
            message_id = %delivery.message_id,
            "Moved render entry to DLQ: {}", error
        );
        Ok(())
    }
}

#[async_trait]
impl RenderQueue for RedisStreamQueue {
    async fn init(&self) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        // Create consumer group (ignore error if already exists). Start from
        // "0" so entries added before the first worker started are delivered.
        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!("Created consumer group: {}", self.config.consumer_group),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group already exists: {}", self.config.consumer_group);
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }

        Ok(())
    }

    async fn enqueue(&self, entry: &RenderQueueEntry) -> QueueResult<String> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(entry)?;

        // Claim the dedup marker first so concurrent submits cannot both add
        let dedup_key = self.dedup_key(entry);
        let claimed: Option<String> = redis::cmd("SET")
            .arg(&dedup_key)
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(self.config.dedup_ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        if claimed.is_none() {
            warn!(job_id = %entry.job_id, "Duplicate render entry rejected");
            return Err(QueueError::Duplicate(entry.job_id.to_string()));
        }

        let added: Result<String, redis::RedisError> = redis::cmd("XADD")
            .arg(&self.config.stream_name)
            .arg("*")
            .arg("entry")
            .arg(&payload)
            .arg("job_id")
            .arg(entry.job_id.as_str())
            .query_async(&mut conn)
            .await;

        let message_id = match added {
            Ok(id) => id,
            Err(e) => {
                // Release the marker so the job can be enqueued again
                conn.del::<_, ()>(&dedup_key).await.ok();
                return Err(QueueError::enqueue_failed(e.to_string()));
            }
        };

        info!(
            job_id = %entry.job_id,
            project_id = %entry.project_id,
            message_id = %message_id,
            "Enqueued render entry"
        );

        Ok(message_id)
    }

    async fn consume(
        &self,
        consumer: &str,
        block: Duration,
        count: usize,
    ) -> QueueResult<Vec<Delivery>> {
        let mut conn = self.connection().await?;

        let result: StreamReadReply = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(consumer)
            .arg("COUNT")
            .arg(count)
            .arg("BLOCK")
            .arg(block.as_millis() as u64)
            .arg("STREAMS")
            .arg(&self.config.stream_name)
            .arg(">") // Only new messages
            .query_async(&mut conn)
            .await?;

        let ids = result.keys.into_iter().flat_map(|key| key.ids).collect();
        let deliveries = self.parse_entries(ids).await;

        if !deliveries.is_empty() {
            debug!("Consumed {} render entries", deliveries.len());
        }
        Ok(deliveries)
    }

    async fn claim_stale(
        &self,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> QueueResult<Vec<Delivery>> {
        let mut conn = self.connection().await?;
        let min_idle_ms = min_idle.as_millis() as u64;

        let pending: StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("-")
            .arg("+")
            .arg(count)
            .query_async(&mut conn)
            .await?;

        let stale: Vec<String> = pending
            .ids
            .into_iter()
            .filter(|p| p.last_delivered_ms as u64 >= min_idle_ms)
            .map(|p| p.id)
            .collect();

        if stale.is_empty() {
            return Ok(Vec::new());
        }

        // XCLAIM re-checks idle time, so a message another worker just took is skipped
        let claimed: StreamClaimReply = redis::cmd("XCLAIM")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(consumer)
            .arg(min_idle_ms)
            .arg(&stale)
            .query_async(&mut conn)
            .await?;

        let deliveries = self.parse_entries(claimed.ids).await;
        for delivery in &deliveries {
            info!(
                job_id = %delivery.entry.job_id,
                message_id = %delivery.message_id,
                "Claimed stale render entry"
            );
        }
        Ok(deliveries)
    }

    async fn extend_lease(&self, consumer: &str, delivery: &Delivery) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        // JUSTID resets the idle time without bumping the delivery counter
        let _: redis::Value = redis::cmd("XCLAIM")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(consumer)
            .arg(0)
            .arg(&delivery.message_id)
            .arg("JUSTID")
            .query_async(&mut conn)
            .await?;

        debug!(message_id = %delivery.message_id, "Extended render entry lease");
        Ok(())
    }

    async fn ack(&self, delivery: &Delivery) -> QueueResult<()> {
        self.remove(&delivery.message_id).await?;
        self.clear_markers(delivery).await?;
        debug!(message_id = %delivery.message_id, "Acknowledged render entry");
        Ok(())
    }

    async fn record_failure(
        &self,
        delivery: &Delivery,
        error: &str,
    ) -> QueueResult<FailureOutcome> {
        let mut conn = self.connection().await?;

        let key = self.retry_key(&delivery.message_id);
        let attempt: u32 = conn.incr(&key, 1).await?;
        conn.expire::<_, ()>(&key, RETRY_COUNTER_TTL_SECS).await?;

        if attempt >= self.config.max_retries {
            self.dead_letter(delivery, error).await?;
            return Ok(FailureOutcome::DeadLettered);
        }

        Ok(FailureOutcome::Retrying {
            attempt,
            max_retries: self.config.max_retries,
        })
    }

    async fn len(&self) -> QueueResult<u64> {
        let mut conn = self.connection().await?;
        let len: u64 = conn.xlen(&self.config.stream_name).await?;
        Ok(len)
    }

    async fn dlq_len(&self) -> QueueResult<u64> {
        let mut conn = self.connection().await?;
        let len: u64 = conn.xlen(&self.config.dlq_stream_name).await?;
        Ok(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vrender_models::{JobId, ProjectId};

    #[test]
    fn test_default_config_dead_letters_first_failure() {
        let config = QueueConfig::default();
        assert_eq!(config.max_retries, 1);
        assert_eq!(config.stream_name, "vrender:render");
    }

    #[test]
    fn test_marker_keys() {
        let queue = RedisStreamQueue::new(QueueConfig::default()).unwrap();
        let entry = RenderQueueEntry::new(ProjectId::from("p1"), JobId::from_string("j1"));
        assert_eq!(queue.dedup_key(&entry), "vrender:render:dedup:render:j1");
        assert_eq!(queue.retry_key("1-0"), "vrender:render:retry:1-0");
    }
}
