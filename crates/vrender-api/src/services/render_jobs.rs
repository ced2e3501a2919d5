//! Render job submission and status queries.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info};

use vrender_models::{JobId, JobStatus, ProjectId, RenderJob, UserId};
use vrender_queue::{RenderQueue, RenderQueueEntry};
use vrender_store::{JobStore, ProjectStore};

use crate::error::{ApiError, ApiResult};
use crate::metrics;

/// Same message for "does not exist" and "not yours".
pub const PROJECT_NOT_FOUND: &str = "Project not found or access denied";
pub const JOB_NOT_FOUND: &str = "Job not found or access denied";

/// Public view of a render job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusView {
    pub id: JobId,
    pub project_id: ProjectId,
    pub status: JobStatus,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<RenderJob> for JobStatusView {
    fn from(job: RenderJob) -> Self {
        Self {
            id: job.id,
            project_id: job.project_id,
            status: job.status,
            progress: job.progress,
            output_url: job.output_url,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

/// Submission path and status query for render jobs.
#[derive(Clone)]
pub struct RenderJobService {
    jobs: Arc<dyn JobStore>,
    projects: Arc<dyn ProjectStore>,
    queue: Arc<dyn RenderQueue>,
}

impl RenderJobService {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        projects: Arc<dyn ProjectStore>,
        queue: Arc<dyn RenderQueue>,
    ) -> Self {
        Self {
            jobs,
            projects,
            queue,
        }
    }

    /// Create a queued render job for a project the user owns and hand it to
    /// the workers.
    ///
    /// When the enqueue fails the created record stays `queued` and the
    /// queue error is returned.
    pub async fn submit(&self, user_id: &UserId, project_id: &ProjectId) -> ApiResult<RenderJob> {
        let project = self
            .projects
            .get_project(project_id)
            .await?
            .filter(|p| p.is_owned_by(user_id))
            .ok_or_else(|| ApiError::not_found(PROJECT_NOT_FOUND))?;

        let job = self.jobs.create(&project.id).await?;

        if let Err(e) = self.queue.enqueue(&RenderQueueEntry::for_job(&job)).await {
            error!(
                job_id = %job.id,
                project_id = %project.id,
                "Render job left queued without a queue entry: {}", e
            );
            metrics::record_job_orphaned();
            return Err(e.into());
        }

        info!(job_id = %job.id, project_id = %project.id, user_id = %user_id, "Render job queued");
        metrics::record_job_submitted();
        Ok(job)
    }

    /// Current state of a job owned by `user_id`.
    pub async fn get_status(&self, user_id: &UserId, job_id: &JobId) -> ApiResult<JobStatusView> {
        let owned = self
            .jobs
            .get(job_id)
            .await?
            .filter(|owned| owned.is_owned_by(user_id))
            .ok_or_else(|| ApiError::not_found(JOB_NOT_FOUND))?;

        Ok(owned.job.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vrender_models::JobUpdate;
    use vrender_queue::MemoryQueue;
    use vrender_store::MemoryStore;

    struct Fixture {
        store: Arc<MemoryStore>,
        queue: Arc<MemoryQueue>,
        service: RenderJobService,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryQueue::default());
        let service = RenderJobService::new(store.clone(), store.clone(), queue.clone());
        Fixture {
            store,
            queue,
            service,
        }
    }

    #[tokio::test]
    async fn test_submit_creates_record_and_entry() {
        let f = fixture();
        let owner = UserId::from("user-1");
        let project = f.store.create_project("Demo", &owner).await.unwrap();

        let job = f.service.submit(&owner, &project.id).await.unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.progress, 0);

        let entries = f.queue.ready_entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].job_id, job.id);
        assert_eq!(entries[0].project_id, project.id);
        assert_eq!(f.store.job_count().await, 1);
    }

    #[tokio::test]
    async fn test_submit_to_foreign_project_is_not_found() {
        let f = fixture();
        let project = f
            .store
            .create_project("Demo", &UserId::from("user-1"))
            .await
            .unwrap();

        let foreign = f
            .service
            .submit(&UserId::from("user-2"), &project.id)
            .await
            .unwrap_err();
        let missing = f
            .service
            .submit(&UserId::from("user-2"), &ProjectId::from("nope"))
            .await
            .unwrap_err();

        assert_eq!(foreign.to_string(), missing.to_string());
        assert!(matches!(foreign, ApiError::NotFound(_)));
        assert_eq!(f.store.job_count().await, 0);
        assert!(f.queue.ready_entries().await.is_empty());
    }

    #[tokio::test]
    async fn test_enqueue_failure_leaves_queued_record() {
        let f = fixture();
        let owner = UserId::from("user-1");
        let project = f.store.create_project("Demo", &owner).await.unwrap();
        f.queue.close();

        let err = f.service.submit(&owner, &project.id).await.unwrap_err();
        assert!(matches!(err, ApiError::Queue(_)));
        assert_eq!(f.store.job_count().await, 1);
    }

    #[tokio::test]
    async fn test_status_hidden_from_other_users() {
        let f = fixture();
        let owner = UserId::from("user-1");
        let project = f.store.create_project("Demo", &owner).await.unwrap();
        let job = f.service.submit(&owner, &project.id).await.unwrap();

        let view = f.service.get_status(&owner, &job.id).await.unwrap();
        assert_eq!(view.status, JobStatus::Queued);

        let foreign = f
            .service
            .get_status(&UserId::from("user-2"), &job.id)
            .await
            .unwrap_err();
        let missing = f
            .service
            .get_status(&owner, &JobId::new())
            .await
            .unwrap_err();
        assert_eq!(foreign.to_string(), missing.to_string());
    }

    #[tokio::test]
    async fn test_status_reflects_worker_updates() {
        let f = fixture();
        let owner = UserId::from("user-1");
        let project = f.store.create_project("Demo", &owner).await.unwrap();
        let job = f.service.submit(&owner, &project.id).await.unwrap();

        f.store.update(&job.id, JobUpdate::started()).await.unwrap();
        f.store
            .update(&job.id, JobUpdate::completed("/renders/demo.mp4"))
            .await
            .unwrap();

        let view = f.service.get_status(&owner, &job.id).await.unwrap();
        assert_eq!(view.status, JobStatus::Completed);
        assert_eq!(view.progress, 100);
        assert_eq!(view.output_url.as_deref(), Some("/renders/demo.mp4"));
    }
}
