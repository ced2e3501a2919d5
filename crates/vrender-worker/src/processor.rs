//! Render job state machine.
//!
//! One delivery moves a job `queued -> processing -> completed`, or to
//! `failed` when anything along the way goes wrong.

use std::sync::Arc;
use std::time::Instant;

use tracing::{error, warn, Instrument};
use vrender_models::{JobStatus, JobUpdate, RenderJob};
use vrender_queue::RenderQueueEntry;
use vrender_store::JobStore;

use crate::error::WorkerResult;
use crate::logging::JobLogger;
use crate::metrics;
use crate::render::{ProgressReporter, RenderOperation, RenderRequest};

/// Why a delivery was acknowledged without running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The job record or its project no longer exists
    Missing,
    /// The job already reached a terminal state
    AlreadyFinished(JobStatus),
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Missing => "missing",
            SkipReason::AlreadyFinished(_) => "terminal",
        }
    }
}

/// Result of processing one delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    Completed(RenderJob),
    Skipped(SkipReason),
}

/// Drives a single job through its lifecycle.
pub struct RenderProcessor {
    store: Arc<dyn JobStore>,
    renderer: Arc<dyn RenderOperation>,
}

impl RenderProcessor {
    pub fn new(store: Arc<dyn JobStore>, renderer: Arc<dyn RenderOperation>) -> Self {
        Self { store, renderer }
    }

    pub fn renderer_name(&self) -> &'static str {
        self.renderer.name()
    }

    /// Process one queue entry.
    ///
    /// On error the job has been marked failed (best effort) and the error
    /// is returned so the caller can report it to the queue.
    pub async fn process(&self, entry: &RenderQueueEntry) -> WorkerResult<ProcessOutcome> {
        let logger = JobLogger::new(&entry.job_id, self.renderer.name());
        let span = logger.create_span();
        self.process_entry(entry, &logger).instrument(span).await
    }

    async fn process_entry(
        &self,
        entry: &RenderQueueEntry,
        logger: &JobLogger,
    ) -> WorkerResult<ProcessOutcome> {
        let current = match self.store.get(&entry.job_id).await {
            Ok(current) => current,
            Err(e) => {
                logger.log_error(&format!("failed to load job: {}", e));
                metrics::record_job_failed(self.renderer.name());
                self.mark_failed(entry).await;
                return Err(e.into());
            }
        };
        let Some(current) = current else {
            logger.log_warning("job or project not found, dropping entry");
            metrics::record_job_skipped(SkipReason::Missing.as_str());
            return Ok(ProcessOutcome::Skipped(SkipReason::Missing));
        };

        if current.job.is_terminal() {
            let reason = SkipReason::AlreadyFinished(current.job.status);
            logger.log_warning(&format!(
                "job already {}, ignoring duplicate delivery",
                current.job.status
            ));
            metrics::record_job_skipped(reason.as_str());
            return Ok(ProcessOutcome::Skipped(reason));
        }

        match self.run(entry, logger).await {
            Ok(job) => Ok(ProcessOutcome::Completed(job)),
            Err(e) => {
                logger.log_error(&e.to_string());
                metrics::record_job_failed(self.renderer.name());
                self.mark_failed(entry).await;
                Err(e)
            }
        }
    }

    async fn run(&self, entry: &RenderQueueEntry, logger: &JobLogger) -> WorkerResult<RenderJob> {
        let started = self
            .store
            .update(&entry.job_id, JobUpdate::started())
            .await?;
        logger.log_start(&format!(
            "project {} (attempt {})",
            entry.project_id, started.attempts
        ));
        metrics::record_job_started(self.renderer.name());

        let request = RenderRequest {
            job_id: entry.job_id.clone(),
            project_id: entry.project_id.clone(),
        };
        let reporter = ProgressReporter::new(Arc::clone(&self.store), entry.job_id.clone());

        let timer = Instant::now();
        let output = self.renderer.render(&request, &reporter).await?;
        logger.log_progress(&format!("render produced {}", output.output_url));

        let job = self
            .store
            .update(&entry.job_id, JobUpdate::completed(output.output_url))
            .await?;

        metrics::record_job_completed(self.renderer.name(), timer.elapsed().as_secs_f64());
        logger.log_completion(job.output_url.as_deref().unwrap_or_default());
        Ok(job)
    }

    /// Write the failed status. A failure here is logged and not retried.
    async fn mark_failed(&self, entry: &RenderQueueEntry) {
        match self.store.update(&entry.job_id, JobUpdate::failed()).await {
            Ok(_) => {}
            Err(e) if e.is_transition() => {
                warn!(job_id = %entry.job_id, "Job not marked failed: {}", e);
            }
            Err(e) => {
                error!(job_id = %entry.job_id, "Failed to mark job as failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::sync::Mutex;
    use vrender_models::{JobId, ProjectId, UserId};
    use vrender_store::{MemoryStore, OwnedJob, ProjectStore, StoreError, StoreResult};

    use crate::error::WorkerError;
    use crate::render::{RenderOutput, SimulatedRenderer};

    /// Records the stored job at each phase boundary.
    struct ObservingRenderer {
        store: Arc<MemoryStore>,
        seen: Mutex<Vec<(JobStatus, u8)>>,
    }

    impl ObservingRenderer {
        async fn observe(&self, job_id: &JobId) {
            let job = self.store.get(job_id).await.unwrap().unwrap().job;
            self.seen.lock().await.push((job.status, job.progress));
        }
    }

    #[async_trait]
    impl RenderOperation for ObservingRenderer {
        fn name(&self) -> &'static str {
            "observing"
        }

        async fn render(
            &self,
            request: &RenderRequest,
            progress: &ProgressReporter,
        ) -> WorkerResult<RenderOutput> {
            self.observe(&request.job_id).await;
            progress.report(50).await?;
            self.observe(&request.job_id).await;
            Ok(RenderOutput {
                output_url: format!("/renders/{}.mp4", request.project_id),
            })
        }
    }

    struct FailingRenderer;

    #[async_trait]
    impl RenderOperation for FailingRenderer {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn render(
            &self,
            _request: &RenderRequest,
            progress: &ProgressReporter,
        ) -> WorkerResult<RenderOutput> {
            progress.report(50).await?;
            Err(WorkerError::render_failed("encoder crashed"))
        }
    }

    /// Reads fail while writes still go through.
    struct UnreadableStore {
        inner: Arc<MemoryStore>,
    }

    #[async_trait]
    impl JobStore for UnreadableStore {
        async fn create(&self, project_id: &ProjectId) -> StoreResult<RenderJob> {
            self.inner.create(project_id).await
        }

        async fn update(&self, job_id: &JobId, update: JobUpdate) -> StoreResult<RenderJob> {
            self.inner.update(job_id, update).await
        }

        async fn get(&self, job_id: &JobId) -> StoreResult<Option<OwnedJob>> {
            Err(StoreError::Conflict(job_id.to_string()))
        }

        async fn ping(&self) -> StoreResult<()> {
            Ok(())
        }
    }

    async fn queued_job(store: &MemoryStore) -> RenderQueueEntry {
        let project = store
            .create_project("Demo", &UserId::from("user-1"))
            .await
            .unwrap();
        let job = store.create(&project.id).await.unwrap();
        RenderQueueEntry::for_job(&job)
    }

    #[tokio::test]
    async fn test_success_path() {
        let store = Arc::new(MemoryStore::new());
        let entry = queued_job(&store).await;
        let processor = RenderProcessor::new(
            store.clone(),
            Arc::new(SimulatedRenderer::new(std::time::Duration::ZERO, "mp4")),
        );

        let outcome = processor.process(&entry).await.unwrap();
        let ProcessOutcome::Completed(job) = outcome else {
            panic!("expected completion");
        };
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        assert_eq!(
            job.output_url,
            Some(format!("/renders/{}.mp4", entry.project_id))
        );
        assert_eq!(job.attempts, 1);
    }

    #[tokio::test]
    async fn test_progress_visible_mid_render() {
        let store = Arc::new(MemoryStore::new());
        let entry = queued_job(&store).await;
        let renderer = Arc::new(ObservingRenderer {
            store: store.clone(),
            seen: Mutex::new(Vec::new()),
        });
        let processor = RenderProcessor::new(store.clone(), renderer.clone());

        processor.process(&entry).await.unwrap();

        assert_eq!(
            *renderer.seen.lock().await,
            vec![(JobStatus::Processing, 10), (JobStatus::Processing, 50)]
        );
    }

    #[tokio::test]
    async fn test_failure_marks_job_failed() {
        let store = Arc::new(MemoryStore::new());
        let entry = queued_job(&store).await;
        let processor = RenderProcessor::new(store.clone(), Arc::new(FailingRenderer));

        let err = processor.process(&entry).await.unwrap_err();
        assert!(matches!(err, WorkerError::Render(_)));

        let job = store.get(&entry.job_id).await.unwrap().unwrap().job;
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.progress, 50);
        assert!(job.output_url.is_none());
    }

    #[tokio::test]
    async fn test_terminal_job_is_skipped() {
        let store = Arc::new(MemoryStore::new());
        let entry = queued_job(&store).await;
        let processor = RenderProcessor::new(store.clone(), Arc::new(FailingRenderer));
        processor.process(&entry).await.unwrap_err();

        // Redelivery of a failed job leaves it failed
        let outcome = processor.process(&entry).await.unwrap();
        assert_eq!(
            outcome,
            ProcessOutcome::Skipped(SkipReason::AlreadyFinished(JobStatus::Failed))
        );
        let job = store.get(&entry.job_id).await.unwrap().unwrap().job;
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempts, 1);
    }

    #[tokio::test]
    async fn test_missing_job_is_skipped() {
        let store = Arc::new(MemoryStore::new());
        let processor = RenderProcessor::new(store, Arc::new(SimulatedRenderer::default()));
        let entry = RenderQueueEntry::new(ProjectId::from("p1"), JobId::new());

        let outcome = processor.process(&entry).await.unwrap();
        assert_eq!(outcome, ProcessOutcome::Skipped(SkipReason::Missing));
    }

    #[tokio::test]
    async fn test_redelivered_processing_job_restarts() {
        let store = Arc::new(MemoryStore::new());
        let entry = queued_job(&store).await;

        // A previous worker crashed halfway through
        store.update(&entry.job_id, JobUpdate::started()).await.unwrap();
        store.update(&entry.job_id, JobUpdate::progress(50)).await.unwrap();

        let renderer = Arc::new(ObservingRenderer {
            store: store.clone(),
            seen: Mutex::new(Vec::new()),
        });
        let processor = RenderProcessor::new(store.clone(), renderer.clone());
        let outcome = processor.process(&entry).await.unwrap();

        let ProcessOutcome::Completed(job) = outcome else {
            panic!("expected completion");
        };
        assert_eq!(job.attempts, 2);
        assert_eq!(
            *renderer.seen.lock().await,
            vec![(JobStatus::Processing, 50), (JobStatus::Processing, 50)]
        );
    }

    #[tokio::test]
    async fn test_unreadable_job_is_marked_failed() {
        let memory = Arc::new(MemoryStore::new());
        let entry = queued_job(&memory).await;
        let store = Arc::new(UnreadableStore {
            inner: memory.clone(),
        });
        let renderer = Arc::new(SimulatedRenderer::new(std::time::Duration::ZERO, "mp4"));
        let processor = RenderProcessor::new(store, renderer);

        let err = processor.process(&entry).await.unwrap_err();
        assert!(matches!(err, WorkerError::Store(_)));

        let job = memory.get(&entry.job_id).await.unwrap().unwrap().job;
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempts, 0);
    }
}
