//! Queue abstraction shared by the submission path and the worker.

use std::time::Duration;

use async_trait::async_trait;

use crate::entry::{Delivery, RenderQueueEntry};
use crate::error::QueueResult;

/// What happened to a delivery whose processing failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Left pending; it will be redelivered once it is reclaimed
    Retrying { attempt: u32, max_retries: u32 },
    /// Moved to the dead letter stream and acked
    DeadLettered,
}

/// Ordered, at-least-once hand-off of render entries.
#[async_trait]
pub trait RenderQueue: Send + Sync {
    /// Prepare the transport (consumer groups, streams).
    async fn init(&self) -> QueueResult<()>;

    /// Append an entry. Returns the transport message ID.
    async fn enqueue(&self, entry: &RenderQueueEntry) -> QueueResult<String>;

    /// Wait up to `block` for new entries and take at most `count` of them.
    async fn consume(
        &self,
        consumer: &str,
        block: Duration,
        count: usize,
    ) -> QueueResult<Vec<Delivery>>;

    /// Take over deliveries left pending for at least `min_idle`.
    async fn claim_stale(
        &self,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> QueueResult<Vec<Delivery>>;

    /// Reset the idle time of a delivery `consumer` is still working on,
    /// so `claim_stale` leaves it alone.
    async fn extend_lease(&self, consumer: &str, delivery: &Delivery) -> QueueResult<()>;

    /// Mark a delivery as finished.
    async fn ack(&self, delivery: &Delivery) -> QueueResult<()>;

    /// Count a failed delivery and dead-letter it once retries run out.
    async fn record_failure(&self, delivery: &Delivery, error: &str)
        -> QueueResult<FailureOutcome>;

    /// Number of entries in the stream.
    async fn len(&self) -> QueueResult<u64>;

    /// Number of dead-lettered entries.
    async fn dlq_len(&self) -> QueueResult<u64>;
}
