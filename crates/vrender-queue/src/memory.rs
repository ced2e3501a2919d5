//! In-memory render queue.
//!
//! Mirrors the Redis Streams semantics: FIFO delivery, entries stay pending
//! until acked, failed deliveries are redelivered through `claim_stale` and
//! dead-lettered once retries run out.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, warn};
use vrender_models::JobId;

use crate::entry::{Delivery, RenderQueueEntry};
use crate::error::{QueueError, QueueResult};
use crate::queue::{FailureOutcome, RenderQueue};

/// An entry that ran out of retries.
#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetter {
    pub original_id: String,
    pub entry: RenderQueueEntry,
    pub error: String,
}

#[derive(Debug)]
struct PendingEntry {
    entry: RenderQueueEntry,
    consumer: String,
    delivered_at: Instant,
}

#[derive(Debug, Default)]
struct QueueState {
    next_seq: u64,
    ready: VecDeque<(String, RenderQueueEntry)>,
    // Keyed by message ID; IDs sort in enqueue order
    pending: BTreeMap<String, PendingEntry>,
    retries: HashMap<String, u32>,
    queued_jobs: HashSet<JobId>,
    dead: Vec<DeadLetter>,
}

/// Process-local queue for tests and single-process setups.
pub struct MemoryQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    max_retries: u32,
    closed: AtomicBool,
}

impl MemoryQueue {
    pub fn new(max_retries: u32) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            max_retries,
            closed: AtomicBool::new(false),
        }
    }

    /// Simulate the transport going away. Every later call fails.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Entries delivered but not yet acked.
    pub async fn pending_len(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.state.lock().await.dead.clone()
    }

    /// Entries waiting for their first delivery, in delivery order.
    pub async fn ready_entries(&self) -> Vec<RenderQueueEntry> {
        self.state
            .lock()
            .await
            .ready
            .iter()
            .map(|(_, entry)| entry.clone())
            .collect()
    }

    fn ensure_open(&self) -> QueueResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(QueueError::connection_failed("queue is closed"));
        }
        Ok(())
    }

    fn finish(state: &mut QueueState, delivery: &Delivery) {
        state.pending.remove(&delivery.message_id);
        state.retries.remove(&delivery.message_id);
        state.queued_jobs.remove(&delivery.entry.job_id);
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new(1)
    }
}

#[async_trait]
impl RenderQueue for MemoryQueue {
    async fn init(&self) -> QueueResult<()> {
        self.ensure_open()
    }

    async fn enqueue(&self, entry: &RenderQueueEntry) -> QueueResult<String> {
        self.ensure_open()?;
        let mut state = self.state.lock().await;

        if !state.queued_jobs.insert(entry.job_id.clone()) {
            warn!(job_id = %entry.job_id, "Duplicate render entry rejected");
            return Err(QueueError::Duplicate(entry.job_id.to_string()));
        }

        state.next_seq += 1;
        let message_id = format!("{:020}-0", state.next_seq);
        state.ready.push_back((message_id.clone(), entry.clone()));
        drop(state);

        self.notify.notify_one();
        debug!(job_id = %entry.job_id, message_id = %message_id, "Enqueued render entry");
        Ok(message_id)
    }

    async fn consume(
        &self,
        consumer: &str,
        block: Duration,
        count: usize,
    ) -> QueueResult<Vec<Delivery>> {
        let deadline = Instant::now() + block;

        loop {
            self.ensure_open()?;
            {
                let mut state = self.state.lock().await;
                if !state.ready.is_empty() {
                    let take = count.min(state.ready.len());
                    let now = Instant::now();
                    let mut deliveries = Vec::with_capacity(take);
                    for (message_id, entry) in state.ready.drain(..take).collect::<Vec<_>>() {
                        state.pending.insert(
                            message_id.clone(),
                            PendingEntry {
                                entry: entry.clone(),
                                consumer: consumer.to_string(),
                                delivered_at: now,
                            },
                        );
                        deliveries.push(Delivery { message_id, entry });
                    }
                    return Ok(deliveries);
                }
            }

            if tokio::time::timeout_at(deadline, self.notify.notified())
                .await
                .is_err()
            {
                return Ok(Vec::new());
            }
        }
    }

    async fn claim_stale(
        &self,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> QueueResult<Vec<Delivery>> {
        self.ensure_open()?;
        let mut state = self.state.lock().await;
        let now = Instant::now();

        let mut claimed = Vec::new();
        for (message_id, pending) in state.pending.iter_mut() {
            if claimed.len() >= count {
                break;
            }
            if now.duration_since(pending.delivered_at) < min_idle {
                continue;
            }
            debug!(
                message_id = %message_id,
                from = %pending.consumer,
                to = %consumer,
                "Claimed stale render entry"
            );
            pending.consumer = consumer.to_string();
            pending.delivered_at = now;
            claimed.push(Delivery {
                message_id: message_id.clone(),
                entry: pending.entry.clone(),
            });
        }

        Ok(claimed)
    }

    async fn extend_lease(&self, consumer: &str, delivery: &Delivery) -> QueueResult<()> {
        self.ensure_open()?;
        let mut state = self.state.lock().await;
        if let Some(pending) = state.pending.get_mut(&delivery.message_id) {
            pending.consumer = consumer.to_string();
            pending.delivered_at = Instant::now();
        }
        Ok(())
    }

    async fn ack(&self, delivery: &Delivery) -> QueueResult<()> {
        self.ensure_open()?;
        let mut state = self.state.lock().await;
        Self::finish(&mut state, delivery);
        Ok(())
    }

    async fn record_failure(
        &self,
        delivery: &Delivery,
        error: &str,
    ) -> QueueResult<FailureOutcome> {
        self.ensure_open()?;
        let mut state = self.state.lock().await;

        let attempt = {
            let count = state.retries.entry(delivery.message_id.clone()).or_insert(0);
            *count += 1;
            *count
        };

        if attempt >= self.max_retries {
            Self::finish(&mut state, delivery);
            state.dead.push(DeadLetter {
                original_id: delivery.message_id.clone(),
                entry: delivery.entry.clone(),
                error: error.to_string(),
            });
            warn!(job_id = %delivery.entry.job_id, "Moved render entry to DLQ: {}", error);
            return Ok(FailureOutcome::DeadLettered);
        }

        Ok(FailureOutcome::Retrying {
            attempt,
            max_retries: self.max_retries,
        })
    }

    async fn len(&self) -> QueueResult<u64> {
        self.ensure_open()?;
        let state = self.state.lock().await;
        Ok((state.ready.len() + state.pending.len()) as u64)
    }

    async fn dlq_len(&self) -> QueueResult<u64> {
        self.ensure_open()?;
        Ok(self.state.lock().await.dead.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vrender_models::ProjectId;

    fn entry(project: &str) -> RenderQueueEntry {
        RenderQueueEntry::new(ProjectId::from(project), JobId::new())
    }

    #[tokio::test]
    async fn test_fifo_delivery() {
        let queue = MemoryQueue::default();
        let first = entry("p1");
        let second = entry("p2");
        queue.enqueue(&first).await.unwrap();
        queue.enqueue(&second).await.unwrap();

        let batch = queue
            .consume("w1", Duration::from_millis(10), 5)
            .await
            .unwrap();
        let jobs: Vec<_> = batch.iter().map(|d| d.entry.job_id.clone()).collect();
        assert_eq!(jobs, vec![first.job_id, second.job_id]);
    }

    #[tokio::test]
    async fn test_each_entry_delivered_once() {
        let queue = MemoryQueue::default();
        queue.enqueue(&entry("p1")).await.unwrap();

        let first = queue.consume("w1", Duration::from_millis(10), 1).await.unwrap();
        let second = queue.consume("w2", Duration::from_millis(10), 1).await.unwrap();
        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
        assert_eq!(queue.pending_len().await, 1);
    }

    #[tokio::test]
    async fn test_consume_times_out_when_empty() {
        let queue = MemoryQueue::default();
        let batch = queue
            .consume("w1", Duration::from_millis(20), 1)
            .await
            .unwrap();
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn test_consume_wakes_on_enqueue() {
        let queue = std::sync::Arc::new(MemoryQueue::default());
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.consume("w1", Duration::from_secs(5), 1).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.enqueue(&entry("p1")).await.unwrap();

        let batch = consumer.await.unwrap().unwrap();
        assert_eq!(batch.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_job_rejected_until_acked() {
        let queue = MemoryQueue::default();
        let e = entry("p1");
        queue.enqueue(&e).await.unwrap();
        assert!(queue.enqueue(&e).await.unwrap_err().is_duplicate());

        let delivery = queue
            .consume("w1", Duration::from_millis(10), 1)
            .await
            .unwrap()
            .remove(0);
        queue.ack(&delivery).await.unwrap();
        assert_eq!(queue.len().await.unwrap(), 0);
        queue.enqueue(&e).await.unwrap();
    }

    #[tokio::test]
    async fn test_failure_redelivers_then_dead_letters() {
        let queue = MemoryQueue::new(2);
        queue.enqueue(&entry("p1")).await.unwrap();
        let delivery = queue
            .consume("w1", Duration::from_millis(10), 1)
            .await
            .unwrap()
            .remove(0);

        let outcome = queue.record_failure(&delivery, "boom").await.unwrap();
        assert_eq!(
            outcome,
            FailureOutcome::Retrying {
                attempt: 1,
                max_retries: 2
            }
        );

        let redelivered = queue
            .claim_stale("w2", Duration::ZERO, 5)
            .await
            .unwrap();
        assert_eq!(redelivered, vec![delivery.clone()]);

        let outcome = queue.record_failure(&delivery, "boom again").await.unwrap();
        assert_eq!(outcome, FailureOutcome::DeadLettered);
        assert_eq!(queue.dlq_len().await.unwrap(), 1);
        assert_eq!(queue.pending_len().await, 0);
        assert_eq!(queue.dead_letters().await[0].error, "boom again");
    }

    #[tokio::test]
    async fn test_claim_respects_idle_time() {
        let queue = MemoryQueue::default();
        queue.enqueue(&entry("p1")).await.unwrap();
        queue.consume("w1", Duration::from_millis(10), 1).await.unwrap();

        let claimed = queue
            .claim_stale("w2", Duration::from_secs(60), 5)
            .await
            .unwrap();
        assert!(claimed.is_empty());
    }

    #[tokio::test]
    async fn test_extended_lease_is_not_claimed() {
        let queue = MemoryQueue::default();
        queue.enqueue(&entry("p1")).await.unwrap();
        let delivery = queue
            .consume("w1", Duration::from_millis(10), 1)
            .await
            .unwrap()
            .remove(0);

        tokio::time::sleep(Duration::from_millis(60)).await;
        queue.extend_lease("w1", &delivery).await.unwrap();

        let claimed = queue
            .claim_stale("w2", Duration::from_millis(50), 5)
            .await
            .unwrap();
        assert!(claimed.is_empty());

        tokio::time::sleep(Duration::from_millis(60)).await;
        let claimed = queue
            .claim_stale("w2", Duration::from_millis(50), 5)
            .await
            .unwrap();
        assert_eq!(claimed, vec![delivery]);
    }

    #[tokio::test]
    async fn test_closed_queue_is_unavailable() {
        let queue = MemoryQueue::default();
        queue.close();
        let err = queue.enqueue(&entry("p1")).await.unwrap_err();
        assert!(matches!(err, QueueError::ConnectionFailed(_)));
    }
}
