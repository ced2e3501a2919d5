//! Redis-backed store.
//!
//! Jobs and projects are JSON documents without TTL. Updates are applied as
//! a compare-and-set so two writers never overwrite each other silently.

use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::{debug, warn};
use vrender_models::{JobId, JobUpdate, Project, ProjectId, RenderJob, UserId};

use crate::error::{StoreError, StoreResult};
use crate::store::{JobStore, OwnedJob, ProjectStore};

/// Attempts made before a contended update gives up.
const MAX_CAS_ATTEMPTS: usize = 5;

/// Replace KEYS[1] with ARGV[2] only if it still holds ARGV[1].
const COMPARE_AND_SET: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    redis.call('SET', KEYS[1], ARGV[2])
    return 1
end
return 0
"#;

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Redis URL
    pub redis_url: String,
    /// Prefix for every key written by the store
    pub key_prefix: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            key_prefix: "vrender".to_string(),
        }
    }
}

impl StoreConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            key_prefix: std::env::var("STORE_KEY_PREFIX")
                .unwrap_or_else(|_| "vrender".to_string()),
        }
    }
}

/// Job and project store on top of Redis.
pub struct RedisStore {
    client: redis::Client,
    config: StoreConfig,
}

impl RedisStore {
    pub fn new(config: StoreConfig) -> StoreResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> StoreResult<Self> {
        Self::new(StoreConfig::from_env())
    }

    fn job_key(&self, job_id: &JobId) -> String {
        format!("{}:job:{}", self.config.key_prefix, job_id)
    }

    fn project_key(&self, project_id: &ProjectId) -> String {
        format!("{}:project:{}", self.config.key_prefix, project_id)
    }

    async fn connection(&self) -> StoreResult<redis::aio::MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }
}

#[async_trait]
impl JobStore for RedisStore {
    async fn create(&self, project_id: &ProjectId) -> StoreResult<RenderJob> {
        let mut conn = self.connection().await?;
        let job = RenderJob::new(project_id.clone());
        let payload = serde_json::to_string(&job)?;

        let created: bool = redis::cmd("SET")
            .arg(self.job_key(&job.id))
            .arg(&payload)
            .arg("NX")
            .query_async::<Option<String>>(&mut conn)
            .await?
            .is_some();

        if !created {
            return Err(StoreError::AlreadyExists(job.id.to_string()));
        }

        debug!(job_id = %job.id, project_id = %project_id, "Created render job");
        Ok(job)
    }

    async fn update(&self, job_id: &JobId, update: JobUpdate) -> StoreResult<RenderJob> {
        let mut conn = self.connection().await?;
        let key = self.job_key(job_id);
        let script = redis::Script::new(COMPARE_AND_SET);

        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let current: Option<String> = conn.get(&key).await?;
            let current = current.ok_or_else(|| StoreError::job_not_found(job_id))?;

            let mut job: RenderJob = serde_json::from_str(&current)?;
            job.apply(&update)?;
            let next = serde_json::to_string(&job)?;

            let swapped: i32 = script
                .key(&key)
                .arg(&current)
                .arg(&next)
                .invoke_async(&mut conn)
                .await?;

            if swapped == 1 {
                return Ok(job);
            }

            warn!(job_id = %job_id, attempt, "Job changed during update, retrying");
        }

        Err(StoreError::Conflict(job_id.to_string()))
    }

    async fn get(&self, job_id: &JobId) -> StoreResult<Option<OwnedJob>> {
        let mut conn = self.connection().await?;

        let payload: Option<String> = conn.get(self.job_key(job_id)).await?;
        let Some(payload) = payload else {
            return Ok(None);
        };
        let job: RenderJob = serde_json::from_str(&payload)?;

        let project: Option<String> = conn.get(self.project_key(&job.project_id)).await?;
        let Some(project) = project else {
            warn!(job_id = %job_id, project_id = %job.project_id, "Job references a missing project");
            return Ok(None);
        };
        let project: Project = serde_json::from_str(&project)?;

        Ok(Some(OwnedJob {
            job,
            owner: project.user_id,
        }))
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.connection().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}

#[async_trait]
impl ProjectStore for RedisStore {
    async fn create_project(&self, name: &str, owner: &UserId) -> StoreResult<Project> {
        let mut conn = self.connection().await?;
        let project = Project::new(name, owner.clone());
        let payload = serde_json::to_string(&project)?;
        conn.set::<_, _, ()>(self.project_key(&project.id), payload)
            .await?;
        Ok(project)
    }

    async fn get_project(&self, project_id: &ProjectId) -> StoreResult<Option<Project>> {
        let mut conn = self.connection().await?;
        let payload: Option<String> = conn.get(self.project_key(project_id)).await?;
        payload
            .map(|p| serde_json::from_str(&p).map_err(StoreError::from))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_use_prefix() {
        let store = RedisStore::new(StoreConfig {
            key_prefix: "test".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(store.job_key(&JobId::from_string("abc")), "test:job:abc");
        assert_eq!(
            store.project_key(&ProjectId::from("p1")),
            "test:project:p1"
        );
    }
}
