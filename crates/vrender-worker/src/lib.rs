//! Render job worker.
//!
//! This crate provides:
//! - The render job state machine (`RenderProcessor`)
//! - A pluggable render operation with a simulated implementation
//! - The job executor: bounded concurrency, crash recovery, graceful shutdown

pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod processor;
pub mod render;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use executor::JobExecutor;
pub use logging::JobLogger;
pub use processor::{ProcessOutcome, RenderProcessor, SkipReason};
pub use render::{
    ProgressReporter, RenderOperation, RenderOutput, RenderRequest, SimulatedRenderer,
    MIDPOINT_PROGRESS,
};
