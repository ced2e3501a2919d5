//! Queue entry types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vrender_models::{JobId, ProjectId, RenderJob};

/// Message handed from the submission path to a render worker.
///
/// Carries only what the worker needs to locate the job record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderQueueEntry {
    pub project_id: ProjectId,
    pub job_id: JobId,
    /// When the entry was enqueued
    pub enqueued_at: DateTime<Utc>,
}

impl RenderQueueEntry {
    pub fn new(project_id: ProjectId, job_id: JobId) -> Self {
        Self {
            project_id,
            job_id,
            enqueued_at: Utc::now(),
        }
    }

    /// Build the entry paired with a freshly created job record.
    pub fn for_job(job: &RenderJob) -> Self {
        Self::new(job.project_id.clone(), job.id.clone())
    }

    /// Generate idempotency key for deduplication.
    pub fn idempotency_key(&self) -> String {
        format!("render:{}", self.job_id)
    }
}

/// One delivery of an entry to a consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// Transport message ID, used to ack or dead-letter the delivery
    pub message_id: String,
    pub entry: RenderQueueEntry,
}
