//! Render job record and the update rules applied to it.

use std::fmt;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{JobStatus, ProjectId, TransitionError};

/// Progress written when a worker starts executing a job.
pub const STARTED_PROGRESS: u8 = 10;

/// Unique identifier for a render job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A render job as persisted in the job record store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RenderJob {
    /// Unique job ID
    pub id: JobId,
    /// Owning project
    pub project_id: ProjectId,
    /// Lifecycle status
    pub status: JobStatus,
    /// Progress percentage (0-100)
    pub progress: u8,
    /// Output location, present only once completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_url: Option<String>,
    /// Number of times a worker started executing this job
    #[serde(default)]
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RenderJob {
    /// Create a new queued job for a project.
    pub fn new(project_id: ProjectId) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            project_id,
            status: JobStatus::Queued,
            progress: 0,
            output_url: None,
            attempts: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Apply a partial update, enforcing the lifecycle rules.
    ///
    /// On error the job is left untouched. Progress only ever grows while
    /// processing, is forced to 100 on completion and is frozen otherwise.
    pub fn apply(&mut self, update: &JobUpdate) -> Result<(), TransitionError> {
        if self.status.is_terminal() {
            return Err(TransitionError::Terminal(self.status));
        }

        let next = match update.status {
            Some(to) if !self.status.can_transition_to(to) => {
                return Err(TransitionError::Invalid {
                    from: self.status,
                    to,
                });
            }
            Some(to) => to,
            None => self.status,
        };

        let output_url = match next {
            JobStatus::Completed => Some(
                update
                    .output_url
                    .clone()
                    .filter(|url| !url.trim().is_empty())
                    .ok_or(TransitionError::MissingOutput)?,
            ),
            _ if update.output_url.is_some() => return Err(TransitionError::UnexpectedOutput),
            _ => None,
        };

        match next {
            JobStatus::Processing => {
                if let Some(progress) = update.progress {
                    self.progress = self.progress.max(progress.min(100));
                }
            }
            JobStatus::Completed => self.progress = 100,
            JobStatus::Queued | JobStatus::Failed => {}
        }

        if update.begin_attempt {
            self.attempts += 1;
        }
        self.status = next;
        self.output_url = output_url;
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Partial update of a render job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub progress: Option<u8>,
    pub output_url: Option<String>,
    /// Count this update as the start of a new execution attempt
    #[serde(default)]
    pub begin_attempt: bool,
}

impl JobUpdate {
    /// Worker picked the job up.
    pub fn started() -> Self {
        Self {
            status: Some(JobStatus::Processing),
            progress: Some(STARTED_PROGRESS),
            begin_attempt: true,
            ..Default::default()
        }
    }

    /// Intermediate progress report.
    pub fn progress(value: u8) -> Self {
        Self {
            status: Some(JobStatus::Processing),
            progress: Some(value),
            ..Default::default()
        }
    }

    /// Render finished successfully.
    pub fn completed(output_url: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Completed),
            progress: Some(100),
            output_url: Some(output_url.into()),
            ..Default::default()
        }
    }

    /// Render failed. Progress keeps its last written value.
    pub fn failed() -> Self {
        Self {
            status: Some(JobStatus::Failed),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> RenderJob {
        RenderJob::new(ProjectId::from("project-1"))
    }

    #[test]
    fn test_new_job_is_queued() {
        let job = job();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.progress, 0);
        assert!(job.output_url.is_none());
        assert_eq!(job.created_at, job.updated_at);
    }

    #[test]
    fn test_happy_path() {
        let mut job = job();
        job.apply(&JobUpdate::started()).unwrap();
        assert_eq!((job.status, job.progress, job.attempts), (JobStatus::Processing, 10, 1));

        job.apply(&JobUpdate::progress(50)).unwrap();
        assert_eq!(job.progress, 50);

        job.apply(&JobUpdate::completed("/renders/project-1.mp4")).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        assert_eq!(job.output_url.as_deref(), Some("/renders/project-1.mp4"));
    }

    #[test]
    fn test_progress_never_decreases() {
        let mut job = job();
        job.apply(&JobUpdate::started()).unwrap();
        job.apply(&JobUpdate::progress(50)).unwrap();

        // Redelivered entry restarts the job
        job.apply(&JobUpdate::started()).unwrap();
        assert_eq!(job.progress, 50);
        assert_eq!(job.attempts, 2);

        job.apply(&JobUpdate::progress(250)).unwrap();
        assert_eq!(job.progress, 100);
    }

    #[test]
    fn test_failed_keeps_last_progress() {
        let mut job = job();
        job.apply(&JobUpdate::started()).unwrap();
        job.apply(&JobUpdate::progress(50)).unwrap();
        job.apply(&JobUpdate::failed()).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.progress, 50);
        assert!(job.output_url.is_none());
    }

    #[test]
    fn test_terminal_jobs_are_frozen() {
        let mut job = job();
        job.apply(&JobUpdate::started()).unwrap();
        job.apply(&JobUpdate::failed()).unwrap();
        let before = job.clone();

        for update in [
            JobUpdate::started(),
            JobUpdate::progress(90),
            JobUpdate::completed("/renders/x.mp4"),
            JobUpdate::failed(),
        ] {
            assert_eq!(
                job.apply(&update),
                Err(TransitionError::Terminal(JobStatus::Failed))
            );
        }
        assert_eq!(job, before);
    }

    #[test]
    fn test_completion_requires_output() {
        let mut job = job();
        job.apply(&JobUpdate::started()).unwrap();
        assert_eq!(
            job.apply(&JobUpdate::completed("  ")),
            Err(TransitionError::MissingOutput)
        );
        assert_eq!(job.status, JobStatus::Processing);
    }

    #[test]
    fn test_output_rejected_before_completion() {
        let mut job = job();
        let update = JobUpdate {
            status: Some(JobStatus::Processing),
            output_url: Some("/renders/early.mp4".into()),
            ..Default::default()
        };
        assert_eq!(job.apply(&update), Err(TransitionError::UnexpectedOutput));
        assert!(job.output_url.is_none());
    }

    #[test]
    fn test_queued_cannot_complete_directly() {
        let mut job = job();
        assert_eq!(
            job.apply(&JobUpdate::completed("/renders/x.mp4")),
            Err(TransitionError::Invalid {
                from: JobStatus::Queued,
                to: JobStatus::Completed
            })
        );
    }

    #[test]
    fn test_updated_at_refreshes() {
        let mut job = job();
        let created = job.updated_at;
        std::thread::sleep(std::time::Duration::from_millis(2));
        job.apply(&JobUpdate::started()).unwrap();
        assert!(job.updated_at > created);
        assert_eq!(job.created_at, created);
    }

    #[test]
    fn test_serializes_camel_case_without_empty_output() {
        let value = serde_json::to_value(job()).unwrap();
        assert!(value.get("projectId").is_some());
        assert!(value.get("createdAt").is_some());
        assert!(value.get("outputUrl").is_none());
        assert_eq!(value["status"], "queued");
    }
}
