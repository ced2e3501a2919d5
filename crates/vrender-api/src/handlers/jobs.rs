//! Job status handler.

use axum::extract::{Path, State};
use axum::Json;
use tracing::debug;

use vrender_models::JobId;

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::services::render_jobs::{JobStatusView, JOB_NOT_FOUND};
use crate::state::AppState;

/// Longest job ID accepted before lookup.
const MAX_JOB_ID_LEN: usize = 128;

/// Job IDs are generated by the store; anything else cannot exist.
fn is_plausible_job_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_JOB_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// GET /api/jobs/:job_id/status
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    user: AuthUser,
) -> ApiResult<Json<JobStatusView>> {
    debug!(user_id = %user.user_id, job_id = %job_id, "get_job_status");

    // Malformed IDs get the same answer as unknown ones
    if !is_plausible_job_id(&job_id) {
        return Err(ApiError::not_found(JOB_NOT_FOUND));
    }

    let view = state
        .render_jobs
        .get_status(&user.user_id, &JobId::from(job_id))
        .await?;
    Ok(Json(view))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_id_shape() {
        assert!(is_plausible_job_id(&JobId::new().to_string()));
        assert!(!is_plausible_job_id(""));
        assert!(!is_plausible_job_id("a/b"));
        assert!(!is_plausible_job_id(&"x".repeat(200)));
    }
}
