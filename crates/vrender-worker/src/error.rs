//! Worker error types.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Render failed: {0}")]
    Render(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(#[from] vrender_store::StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] vrender_queue::QueueError),
}

impl WorkerError {
    pub fn render_failed(msg: impl Into<String>) -> Self {
        Self::Render(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
