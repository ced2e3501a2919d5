//! Shared data models for the vrender backend.
//!
//! This crate provides Serde-serializable types for:
//! - Render jobs and their lifecycle status
//! - Partial job updates and the transition rules they must obey
//! - Projects and the identifiers that tie jobs to their owners

pub mod error;
pub mod job;
pub mod job_status;
pub mod project;

// Re-export common types
pub use error::TransitionError;
pub use job::{JobId, JobUpdate, RenderJob, STARTED_PROGRESS};
pub use job_status::JobStatus;
pub use project::{Project, ProjectId, UserId};
