//! Render operations.
//!
//! The worker drives a job through its lifecycle; what "rendering" means is
//! behind the [`RenderOperation`] trait so the media pipeline can be swapped
//! without touching the state machine.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;
use vrender_models::{JobId, JobUpdate, ProjectId};
use vrender_store::JobStore;

use crate::error::WorkerResult;

/// Progress reported between the two phases of the simulated render.
pub const MIDPOINT_PROGRESS: u8 = 50;

/// Input of a render operation.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderRequest {
    pub job_id: JobId,
    pub project_id: ProjectId,
}

/// Result of a successful render operation.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderOutput {
    /// Location of the produced artifact
    pub output_url: String,
}

/// Writes intermediate progress of a running job to the store.
#[derive(Clone)]
pub struct ProgressReporter {
    store: Arc<dyn JobStore>,
    job_id: JobId,
}

impl ProgressReporter {
    pub fn new(store: Arc<dyn JobStore>, job_id: JobId) -> Self {
        Self { store, job_id }
    }

    /// Record `percent` as the job's progress.
    ///
    /// Values below the stored progress are ignored by the store.
    pub async fn report(&self, percent: u8) -> WorkerResult<()> {
        let job = self
            .store
            .update(&self.job_id, JobUpdate::progress(percent))
            .await?;
        debug!(job_id = %self.job_id, progress = job.progress, "Reported render progress");
        Ok(())
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }
}

/// The long-running media operation behind a render job.
#[async_trait]
pub trait RenderOperation: Send + Sync {
    /// Name used in logs and metrics.
    fn name(&self) -> &'static str;

    /// Produce the output for `request`, reporting progress along the way.
    async fn render(
        &self,
        request: &RenderRequest,
        progress: &ProgressReporter,
    ) -> WorkerResult<RenderOutput>;
}

/// Stand-in for the media pipeline: two timed phases with a progress report
/// in between.
#[derive(Debug, Clone)]
pub struct SimulatedRenderer {
    phase_duration: Duration,
    extension: String,
}

impl SimulatedRenderer {
    pub fn new(phase_duration: Duration, extension: impl Into<String>) -> Self {
        Self {
            phase_duration,
            extension: extension.into(),
        }
    }

    /// Output location for a project.
    pub fn output_url(&self, project_id: &ProjectId) -> String {
        format!("/renders/{}.{}", project_id, self.extension)
    }
}

impl Default for SimulatedRenderer {
    fn default() -> Self {
        Self::new(Duration::from_secs(15), "mp4")
    }
}

#[async_trait]
impl RenderOperation for SimulatedRenderer {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn render(
        &self,
        request: &RenderRequest,
        progress: &ProgressReporter,
    ) -> WorkerResult<RenderOutput> {
        tokio::time::sleep(self.phase_duration).await;
        progress.report(MIDPOINT_PROGRESS).await?;
        tokio::time::sleep(self.phase_duration).await;

        Ok(RenderOutput {
            output_url: self.output_url(&request.project_id),
        })
    }
}
