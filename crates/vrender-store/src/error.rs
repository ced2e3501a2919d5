//! Store error types.

use thiserror::Error;
use vrender_models::TransitionError;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Job already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid job update: {0}")]
    Transition(#[from] TransitionError),

    #[error("Concurrent update conflict on job {0}")]
    Conflict(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    pub fn job_not_found(id: impl std::fmt::Display) -> Self {
        Self::JobNotFound(id.to_string())
    }

    /// True if the update was refused because it breaks the lifecycle rules.
    pub fn is_transition(&self) -> bool {
        matches!(self, StoreError::Transition(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::JobNotFound(_))
    }
}
