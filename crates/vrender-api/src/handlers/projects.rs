//! Project and render submission handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use validator::Validate;

use vrender_models::{JobId, Project, ProjectId};

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Body of POST /api/projects.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateProjectRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
}

/// POST /api/projects
pub async fn create_project(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<CreateProjectRequest>,
) -> ApiResult<(StatusCode, Json<Project>)> {
    request.validate()?;
    let name = request.name.trim();
    if name.is_empty() {
        return Err(ApiError::Validation("name: must not be blank".to_string()));
    }

    let project = state
        .projects
        .create_project(name, &user.user_id)
        .await?;
    Ok((StatusCode::CREATED, Json(project)))
}

/// Response of a render submission.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRenderResponse {
    pub job_id: JobId,
    pub message: &'static str,
}

/// POST /api/projects/:project_id/render
pub async fn submit_render(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    user: AuthUser,
) -> ApiResult<(StatusCode, Json<SubmitRenderResponse>)> {
    let job = state
        .render_jobs
        .submit(&user.user_id, &ProjectId::from(project_id))
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitRenderResponse {
            job_id: job.id,
            message: "Render job accepted",
        }),
    ))
}
