//! Application state.

use std::sync::Arc;

use vrender_queue::{RedisStreamQueue, RenderQueue};
use vrender_store::{JobStore, ProjectStore, RedisStore};

use crate::auth::JwtVerifier;
use crate::config::ApiConfig;
use crate::services::RenderJobService;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub jobs: Arc<dyn JobStore>,
    pub projects: Arc<dyn ProjectStore>,
    pub queue: Arc<dyn RenderQueue>,
    pub auth: Arc<JwtVerifier>,
    pub render_jobs: RenderJobService,
}

impl AppState {
    /// Create application state backed by Redis.
    pub async fn new(config: ApiConfig) -> anyhow::Result<Self> {
        let store = Arc::new(RedisStore::from_env()?);
        let queue = Arc::new(RedisStreamQueue::from_env()?);
        queue.init().await?;

        Ok(Self::from_parts(config, store.clone(), store, queue))
    }

    /// Assemble state from already constructed backends.
    pub fn from_parts(
        config: ApiConfig,
        jobs: Arc<dyn JobStore>,
        projects: Arc<dyn ProjectStore>,
        queue: Arc<dyn RenderQueue>,
    ) -> Self {
        let auth = Arc::new(JwtVerifier::new(&config.jwt_secret));
        let render_jobs = RenderJobService::new(
            Arc::clone(&jobs),
            Arc::clone(&projects),
            Arc::clone(&queue),
        );

        Self {
            config,
            jobs,
            projects,
            queue,
            auth,
            render_jobs,
        }
    }
}
