//! Business logic services.

pub mod render_jobs;

pub use render_jobs::{JobStatusView, RenderJobService};
