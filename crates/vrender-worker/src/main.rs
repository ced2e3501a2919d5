//! Render worker binary.

use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vrender_queue::RedisStreamQueue;
use vrender_store::RedisStore;
use vrender_worker::{metrics, JobExecutor, RenderProcessor, SimulatedRenderer, WorkerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing with colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,vrender=info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting vrender-worker");

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    if let Some(port) = config.metrics_port {
        metrics::init_metrics(port)?;
        info!("Metrics exporter listening on port {}", port);
    }

    let store = Arc::new(RedisStore::from_env().context("Failed to create job store")?);
    let queue = Arc::new(RedisStreamQueue::from_env().context("Failed to create render queue")?);
    let renderer = Arc::new(SimulatedRenderer::new(
        config.render_phase_duration,
        config.output_extension.clone(),
    ));

    let processor = RenderProcessor::new(store, renderer);
    let executor = Arc::new(JobExecutor::new(config, queue, processor));

    // Setup signal handler
    let signal_executor = Arc::clone(&executor);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            return;
        }
        info!("Received shutdown signal");
        signal_executor.shutdown();
    });

    executor.run().await.context("Executor error")?;

    info!("Worker shutdown complete");
    Ok(())
}
