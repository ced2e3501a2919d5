//! Store traits.

use async_trait::async_trait;
use vrender_models::{JobId, JobUpdate, Project, ProjectId, RenderJob, UserId};

use crate::error::StoreResult;

/// A job joined with the user that owns its project.
#[derive(Debug, Clone, PartialEq)]
pub struct OwnedJob {
    pub job: RenderJob,
    pub owner: UserId,
}

impl OwnedJob {
    pub fn is_owned_by(&self, user_id: &UserId) -> bool {
        &self.owner == user_id
    }
}

/// Durable storage of render job records.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new queued job for `project_id`.
    async fn create(&self, project_id: &ProjectId) -> StoreResult<RenderJob>;

    /// Apply a partial update and return the stored result.
    ///
    /// Refreshes `updated_at`. Fails with `JobNotFound` for unknown ids and
    /// with `Transition` when the update breaks the lifecycle rules.
    async fn update(&self, job_id: &JobId, update: JobUpdate) -> StoreResult<RenderJob>;

    /// Point lookup joined with the project owner.
    ///
    /// Returns `None` when the job or its project does not exist.
    async fn get(&self, job_id: &JobId) -> StoreResult<Option<OwnedJob>>;

    /// Connectivity check for readiness probes.
    async fn ping(&self) -> StoreResult<()>;
}

/// Project ownership lookup.
#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn create_project(&self, name: &str, owner: &UserId) -> StoreResult<Project>;

    async fn get_project(&self, project_id: &ProjectId) -> StoreResult<Option<Project>>;
}
