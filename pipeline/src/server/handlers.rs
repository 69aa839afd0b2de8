//! Dispatch API request handlers

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use openapi_server::models::{
    CreateProjectRequest, CreateProjectResponse, DeploymentResponse, ErrorResponse,
    HealthResponse, ProjectData, VersionResponse,
};
use tracing::error;

use crate::errors::PipelineError;
use crate::server::state::ServerState;
use crate::utils::version_info;

impl PipelineError {
    /// HTTP status and error code reported to API clients
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            PipelineError::ValidationError(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            PipelineError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            PipelineError::DispatchError(_) => (StatusCode::BAD_GATEWAY, "dispatch_error"),
            PipelineError::RoutingError(_) => (StatusCode::BAD_GATEWAY, "routing_error"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }
        let body = ErrorResponse {
            error: code.to_string(),
            message: self.to_string(),
            details: None,
        };
        (status, Json(body)).into_response()
    }
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "shipit".to_string(),
        version: version.version,
    })
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    let version = version_info();
    Json(VersionResponse {
        version: version.version,
        git_hash: version.git_hash,
        build_time: version.build_time,
    })
}

/// Queue a deployment of a repository
pub async fn create_project_handler(
    State(state): State<Arc<ServerState>>,
    payload: Result<Json<CreateProjectRequest>, JsonRejection>,
) -> Result<Json<CreateProjectResponse>, PipelineError> {
    let Json(request) =
        payload.map_err(|e| PipelineError::ValidationError(e.body_text()))?;

    let submission = state
        .dispatch
        .submit(&request.git_url, request.slug.as_deref())
        .await?;

    Ok(Json(CreateProjectResponse {
        status: "queued".to_string(),
        data: ProjectData {
            project_slug: submission.id,
            url: submission.serving_url,
        },
    }))
}

/// Get a deployment record
pub async fn get_project_handler(
    State(state): State<Arc<ServerState>>,
    Path(slug): Path<String>,
) -> Result<Json<DeploymentResponse>, PipelineError> {
    let deployment = state.dispatch.get(&slug).await?;

    Ok(Json(DeploymentResponse {
        url: state.dispatch.url_for(&deployment.id),
        id: deployment.id,
        source_repo_url: deployment.source_repo_url,
        status: deployment.status.to_string(),
        error: deployment.error,
        created_at: deployment.created_at,
        updated_at: deployment.updated_at,
    }))
}
