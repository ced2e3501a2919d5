//! Model-level error types.

use thiserror::Error;

use crate::JobStatus;

/// A job update that would break the lifecycle rules.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("Job is already {0} and can no longer change")]
    Terminal(JobStatus),

    #[error("Cannot move job from {from} to {to}")]
    Invalid { from: JobStatus, to: JobStatus },

    #[error("A completed job needs a non-empty output URL")]
    MissingOutput,

    #[error("Output URL can only be set on a completed job")]
    UnexpectedOutput,
}
