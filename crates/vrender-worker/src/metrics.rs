//! Prometheus metrics for the render worker.

use std::net::SocketAddr;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::{WorkerError, WorkerResult};

/// Metric names as constants for consistency.
pub mod names {
    pub const JOBS_STARTED_TOTAL: &str = "vrender_jobs_started_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "vrender_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "vrender_jobs_failed_total";
    pub const JOBS_DEAD_LETTERED_TOTAL: &str = "vrender_jobs_dead_lettered_total";
    pub const JOBS_SKIPPED_TOTAL: &str = "vrender_jobs_skipped_total";
    pub const RENDER_DURATION_SECONDS: &str = "vrender_render_duration_seconds";
}

/// Install the Prometheus recorder and serve it on `port`.
pub fn init_metrics(port: u16) -> WorkerResult<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| WorkerError::config_error(format!("metrics exporter: {}", e)))
}

pub fn record_job_started(renderer: &str) {
    counter!(names::JOBS_STARTED_TOTAL, "renderer" => renderer.to_string()).increment(1);
}

pub fn record_job_completed(renderer: &str, duration_secs: f64) {
    counter!(names::JOBS_COMPLETED_TOTAL, "renderer" => renderer.to_string()).increment(1);
    histogram!(names::RENDER_DURATION_SECONDS, "renderer" => renderer.to_string())
        .record(duration_secs);
}

pub fn record_job_failed(renderer: &str) {
    counter!(names::JOBS_FAILED_TOTAL, "renderer" => renderer.to_string()).increment(1);
}

pub fn record_job_dead_lettered() {
    counter!(names::JOBS_DEAD_LETTERED_TOTAL).increment(1);
}

/// Record a delivery that was acked without running (stale or duplicate).
pub fn record_job_skipped(reason: &'static str) {
    counter!(names::JOBS_SKIPPED_TOTAL, "reason" => reason).increment(1);
}
