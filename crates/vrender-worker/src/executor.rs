//! Job executor.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use vrender_queue::{Delivery, FailureOutcome, RenderQueue};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::metrics;
use crate::processor::{ProcessOutcome, RenderProcessor};

/// Largest batch taken from the queue in one call.
const MAX_BATCH: usize = 5;

/// Pause after a failed consume call.
const ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Job executor that processes render entries from the queue.
pub struct JobExecutor {
    config: WorkerConfig,
    queue: Arc<dyn RenderQueue>,
    processor: Arc<RenderProcessor>,
    job_semaphore: Arc<Semaphore>,
    shutdown: watch::Sender<bool>,
    consumer_name: String,
}

impl JobExecutor {
    /// Create a new job executor.
    pub fn new(
        config: WorkerConfig,
        queue: Arc<dyn RenderQueue>,
        processor: RenderProcessor,
    ) -> Self {
        let job_semaphore = Arc::new(Semaphore::new(config.max_concurrent_jobs));
        let (shutdown, _) = watch::channel(false);
        let consumer_name = format!("worker-{}", Uuid::new_v4());

        Self {
            config,
            queue,
            processor: Arc::new(processor),
            job_semaphore,
            shutdown,
            consumer_name,
        }
    }

    pub fn consumer_name(&self) -> &str {
        &self.consumer_name
    }

    /// Start the executor. Returns once `shutdown` was called and in-flight
    /// jobs finished or the shutdown timeout elapsed.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            "Starting job executor '{}' with {} max concurrent jobs",
            self.consumer_name, self.config.max_concurrent_jobs
        );

        // Subscribe first so a shutdown sent during init is still seen
        let mut shutdown_rx = self.shutdown.subscribe();
        self.queue.init().await?;

        let claim_task = self.spawn_claim_task();

        // Main consumption loop
        while !*shutdown_rx.borrow_and_update() {
            tokio::select! {
                _ = shutdown_rx.changed() => {}
                result = self.consume_jobs() => {
                    if let Err(e) = result {
                        error!("Error consuming jobs: {}", e);
                        // Back off on error
                        tokio::select! {
                            _ = shutdown_rx.changed() => {}
                            _ = tokio::time::sleep(ERROR_BACKOFF) => {}
                        }
                    }
                }
            }
        }
        info!("Shutdown signal received, stopping executor");

        claim_task.abort();

        info!("Waiting for in-flight jobs to complete...");
        if tokio::time::timeout(self.config.shutdown_timeout, self.wait_for_jobs())
            .await
            .is_err()
        {
            warn!(
                "Shutdown timeout elapsed with {} jobs still running",
                self.in_flight()
            );
        }

        info!("Job executor stopped");
        Ok(())
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Number of jobs currently executing.
    pub fn in_flight(&self) -> usize {
        self.config.max_concurrent_jobs - self.job_semaphore.available_permits()
    }

    /// Periodically reclaim deliveries left pending by crashed workers.
    fn spawn_claim_task(&self) -> tokio::task::JoinHandle<()> {
        let queue = Arc::clone(&self.queue);
        let processor = Arc::clone(&self.processor);
        let semaphore = Arc::clone(&self.job_semaphore);
        let consumer_name = self.consumer_name.clone();
        let claim_interval = self.config.claim_interval.max(Duration::from_millis(10));
        let min_idle = self.config.claim_min_idle;
        let lease_interval = self.lease_interval();
        let mut shutdown_rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(claim_interval);
            while !*shutdown_rx.borrow_and_update() {
                tokio::select! {
                    _ = shutdown_rx.changed() => {}
                    _ = interval.tick() => {
                        match queue.claim_stale(&consumer_name, min_idle, MAX_BATCH).await {
                            Ok(deliveries) if !deliveries.is_empty() => {
                                info!("Claimed {} pending entries", deliveries.len());
                                for delivery in deliveries {
                                    let Ok(permit) = semaphore.clone().acquire_owned().await else {
                                        break;
                                    };
                                    let queue = Arc::clone(&queue);
                                    let processor = Arc::clone(&processor);
                                    let consumer = consumer_name.clone();

                                    tokio::spawn(async move {
                                        let _permit = permit;
                                        Self::execute_job(
                                            processor,
                                            queue,
                                            delivery,
                                            consumer,
                                            lease_interval,
                                        )
                                        .await;
                                    });
                                }
                            }
                            Ok(_) => {}
                            Err(e) => {
                                warn!("Failed to claim pending entries: {}", e);
                            }
                        }
                    }
                }
            }
        })
    }

    /// Consume and process entries from the queue.
    async fn consume_jobs(&self) -> WorkerResult<()> {
        let available = self.job_semaphore.available_permits();
        if available == 0 {
            // All slots busy, wait a bit
            tokio::time::sleep(Duration::from_millis(100)).await;
            return Ok(());
        }

        let deliveries = self
            .queue
            .consume(
                &self.consumer_name,
                self.config.consume_block,
                available.min(MAX_BATCH),
            )
            .await?;

        if deliveries.is_empty() {
            return Ok(());
        }

        debug!("Consumed {} entries from queue", deliveries.len());

        for delivery in deliveries {
            let processor = Arc::clone(&self.processor);
            let queue = Arc::clone(&self.queue);
            let consumer = self.consumer_name.clone();
            let lease_interval = self.lease_interval();
            let permit = self
                .job_semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| WorkerError::config_error("Semaphore closed"))?;

            tokio::spawn(async move {
                let _permit = permit;
                Self::execute_job(processor, queue, delivery, consumer, lease_interval).await;
            });
        }

        Ok(())
    }

    /// How often in-flight deliveries are refreshed; well inside the claim window.
    fn lease_interval(&self) -> Duration {
        (self.config.claim_min_idle / 3).max(Duration::from_millis(10))
    }

    /// Execute a single delivery and settle it with the queue.
    ///
    /// While the job runs its lease is extended so the claim task of this or
    /// any other worker does not hand it to a second handler.
    async fn execute_job(
        processor: Arc<RenderProcessor>,
        queue: Arc<dyn RenderQueue>,
        delivery: Delivery,
        consumer: String,
        lease_interval: Duration,
    ) {
        let job_id = delivery.entry.job_id.clone();
        debug!(job_id = %job_id, message_id = %delivery.message_id, "Executing render entry");

        let work = processor.process(&delivery.entry);
        tokio::pin!(work);

        let mut lease = tokio::time::interval(lease_interval);
        lease.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately
        lease.tick().await;

        let result = loop {
            tokio::select! {
                result = &mut work => break result,
                _ = lease.tick() => {
                    if let Err(e) = queue.extend_lease(&consumer, &delivery).await {
                        warn!(job_id = %job_id, "Failed to extend render entry lease: {}", e);
                    }
                }
            }
        };

        match result {
            Ok(outcome) => {
                if let ProcessOutcome::Skipped(reason) = outcome {
                    info!(job_id = %job_id, reason = reason.as_str(), "Render entry skipped");
                }
                if let Err(e) = queue.ack(&delivery).await {
                    error!(job_id = %job_id, "Failed to ack render entry: {}", e);
                }
            }
            Err(e) => match queue.record_failure(&delivery, &e.to_string()).await {
                Ok(FailureOutcome::DeadLettered) => {
                    warn!(job_id = %job_id, "Render entry moved to DLQ");
                    metrics::record_job_dead_lettered();
                }
                Ok(FailureOutcome::Retrying {
                    attempt,
                    max_retries,
                }) => {
                    info!(
                        job_id = %job_id,
                        "Render entry will be redelivered (attempt {}/{})", attempt, max_retries
                    );
                }
                Err(queue_err) => {
                    error!(job_id = %job_id, "Failed to record render failure: {}", queue_err);
                }
            },
        }
    }

    /// Wait for all in-flight jobs to complete.
    async fn wait_for_jobs(&self) {
        while self.in_flight() > 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}
