//! In-memory store backend.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;
use vrender_models::{JobId, JobUpdate, Project, ProjectId, RenderJob, UserId};

use crate::error::{StoreError, StoreResult};
use crate::store::{JobStore, OwnedJob, ProjectStore};

/// Process-local store. State is lost on restart.
#[derive(Default)]
pub struct MemoryStore {
    jobs: RwLock<HashMap<JobId, RenderJob>>,
    projects: RwLock<HashMap<ProjectId, Project>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored jobs.
    pub async fn job_count(&self) -> usize {
        self.jobs.read().await.len()
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn create(&self, project_id: &ProjectId) -> StoreResult<RenderJob> {
        let job = RenderJob::new(project_id.clone());
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(StoreError::AlreadyExists(job.id.to_string()));
        }
        jobs.insert(job.id.clone(), job.clone());
        debug!(job_id = %job.id, project_id = %project_id, "Created render job");
        Ok(job)
    }

    async fn update(&self, job_id: &JobId, update: JobUpdate) -> StoreResult<RenderJob> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| StoreError::job_not_found(job_id))?;

        // Apply to a copy so a rejected update leaves the record untouched
        let mut next = job.clone();
        next.apply(&update)?;
        *job = next.clone();
        Ok(next)
    }

    async fn get(&self, job_id: &JobId) -> StoreResult<Option<OwnedJob>> {
        let Some(job) = self.jobs.read().await.get(job_id).cloned() else {
            return Ok(None);
        };
        let owner = self
            .projects
            .read()
            .await
            .get(&job.project_id)
            .map(|p| p.user_id.clone());
        Ok(owner.map(|owner| OwnedJob { job, owner }))
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[async_trait]
impl ProjectStore for MemoryStore {
    async fn create_project(&self, name: &str, owner: &UserId) -> StoreResult<Project> {
        let project = Project::new(name, owner.clone());
        self.projects
            .write()
            .await
            .insert(project.id.clone(), project.clone());
        Ok(project)
    }

    async fn get_project(&self, project_id: &ProjectId) -> StoreResult<Option<Project>> {
        Ok(self.projects.read().await.get(project_id).cloned())
    }
}
