//! Build pipeline handlers

use crate::api::rest::state::AppState;
use crate::error::{ApiError, ApiResult};
use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use switchyard_types::{ArtifactRef, ServiceKey};

/// Artifact event from the build pipeline
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ArtifactRequest {
    pub project: String,
    pub environment: String,
    pub service: String,
    pub version: ArtifactRef,
}

impl ArtifactRequest {
    fn key(&self) -> ApiResult<ServiceKey> {
        if self.version.is_empty() {
            return Err(ApiError::BadRequest("version must not be empty".to_string()));
        }
        Ok(ServiceKey::new(&self.project, &self.environment, &self.service))
    }
}

/// Artifact state after the event was applied
#[derive(Debug, Serialize)]
pub struct ArtifactResponse {
    pub key: ServiceKey,
    pub version: ArtifactRef,
    pub ready: bool,
}

/// Register a build that has started
pub async fn register_artifact(
    State(state): State<AppState>,
    Json(request): Json<ArtifactRequest>,
) -> ApiResult<(StatusCode, Json<ArtifactResponse>)> {
    let key = request.key()?;
    state.artifacts.register(&key, &request.version);

    tracing::info!(service = %key, version = %request.version, "Registered artifact");

    Ok((
        StatusCode::CREATED,
        Json(ArtifactResponse {
            key,
            version: request.version,
            ready: false,
        }),
    ))
}

/// Mark a build as finished and deployable
pub async fn mark_artifact_ready(
    State(state): State<AppState>,
    Json(request): Json<ArtifactRequest>,
) -> ApiResult<Json<ArtifactResponse>> {
    let key = request.key()?;
    state.artifacts.mark_ready(&key, &request.version);

    // A release waiting on this build can move now
    state.plane.queue.add(key.clone());

    tracing::info!(service = %key, version = %request.version, "Artifact ready");

    Ok(Json(ArtifactResponse {
        key,
        version: request.version,
        ready: true,
    }))
}
