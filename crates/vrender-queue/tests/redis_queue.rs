//! Redis Streams queue integration tests.

use std::time::Duration;

use vrender_models::{JobId, ProjectId};
use vrender_queue::{FailureOutcome, QueueConfig, RedisStreamQueue, RenderQueue, RenderQueueEntry};

/// Queue on a stream unique to this test run.
fn test_queue(max_retries: u32) -> RedisStreamQueue {
    dotenvy::dotenv().ok();

    let stream = format!("vrender:test:{}", JobId::new());
    let config = QueueConfig {
        dlq_stream_name: format!("{}:dlq", stream),
        stream_name: stream,
        max_retries,
        ..QueueConfig::from_env()
    };
    RedisStreamQueue::new(config).expect("Failed to create queue")
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_enqueue_consume_ack() {
    let queue = test_queue(1);
    queue.init().await.expect("Failed to initialize queue");

    let entry = RenderQueueEntry::new(ProjectId::from("p1"), JobId::new());
    queue.enqueue(&entry).await.expect("Failed to enqueue");

    let deliveries = queue
        .consume("test-consumer", Duration::from_secs(1), 1)
        .await
        .expect("Failed to consume");
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].entry.job_id, entry.job_id);

    queue.ack(&deliveries[0]).await.expect("Failed to ack");
    assert_eq!(queue.len().await.unwrap(), 0);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_entries_enqueued_before_init_are_delivered() {
    let queue = test_queue(1);
    let entry = RenderQueueEntry::new(ProjectId::from("p1"), JobId::new());
    queue.enqueue(&entry).await.expect("Failed to enqueue");

    queue.init().await.expect("Failed to initialize queue");
    let deliveries = queue
        .consume("test-consumer", Duration::from_secs(1), 1)
        .await
        .expect("Failed to consume");
    assert_eq!(deliveries.len(), 1);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_duplicate_rejected() {
    let queue = test_queue(1);
    queue.init().await.expect("Failed to initialize queue");

    let entry = RenderQueueEntry::new(ProjectId::from("p1"), JobId::new());
    queue.enqueue(&entry).await.expect("Failed to enqueue");
    let err = queue.enqueue(&entry).await.unwrap_err();
    assert!(err.is_duplicate());
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_retry_then_dlq() {
    let queue = test_queue(2);
    queue.init().await.expect("Failed to initialize queue");

    let entry = RenderQueueEntry::new(ProjectId::from("p1"), JobId::new());
    queue.enqueue(&entry).await.expect("Failed to enqueue");
    let delivery = queue
        .consume("test-consumer", Duration::from_secs(1), 1)
        .await
        .expect("Failed to consume")
        .remove(0);

    let outcome = queue.record_failure(&delivery, "first").await.unwrap();
    assert!(matches!(outcome, FailureOutcome::Retrying { attempt: 1, .. }));

    tokio::time::sleep(Duration::from_millis(50)).await;
    let claimed = queue
        .claim_stale("other-consumer", Duration::from_millis(10), 10)
        .await
        .expect("Failed to claim");
    assert_eq!(claimed.len(), 1);

    let outcome = queue.record_failure(&claimed[0], "second").await.unwrap();
    assert_eq!(outcome, FailureOutcome::DeadLettered);
    assert_eq!(queue.dlq_len().await.unwrap(), 1);
    assert_eq!(queue.len().await.unwrap(), 0);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_extended_lease_blocks_claim() {
    let queue = test_queue(1);
    queue.init().await.expect("Failed to initialize queue");

    let entry = RenderQueueEntry::new(ProjectId::from("p1"), JobId::new());
    queue.enqueue(&entry).await.expect("Failed to enqueue");
    let delivery = queue
        .consume("test-consumer", Duration::from_secs(1), 1)
        .await
        .expect("Failed to consume")
        .remove(0);

    tokio::time::sleep(Duration::from_millis(300)).await;
    queue
        .extend_lease("test-consumer", &delivery)
        .await
        .expect("Failed to extend lease");

    let claimed = queue
        .claim_stale("other-consumer", Duration::from_millis(250), 10)
        .await
        .expect("Failed to claim");
    assert!(claimed.is_empty());
}
