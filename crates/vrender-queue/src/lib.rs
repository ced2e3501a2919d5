//! Render job queue.
//!
//! This crate provides:
//! - Entry enqueueing via Redis Streams with per-job deduplication
//! - Consumer-group delivery with retry counting and a dead letter stream
//! - Reclaiming of entries left pending by crashed workers
//! - An in-memory queue with the same delivery semantics for tests

pub mod entry;
pub mod error;
pub mod memory;
pub mod queue;
pub mod redis_queue;

pub use entry::{Delivery, RenderQueueEntry};
pub use error::{QueueError, QueueResult};
pub use memory::{DeadLetter, MemoryQueue};
pub use queue::{FailureOutcome, RenderQueue};
pub use redis_queue::{QueueConfig, RedisStreamQueue};
