//! Desired state, release status and operator control handlers

use crate::api::rest::state::AppState;
use crate::error::{ApiError, ApiResult};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use switchyard_control::{ReleaseStatus, RollbackOutcome, ServiceStatus};
use switchyard_types::{
    ArtifactRef, HealthCheckConfig, Release, ReleaseId, ResourceLimits, RolloutStrategy,
    ServiceKey, ServiceSpec,
};

/// `/services/:project/:environment/:service`
#[derive(Debug, Deserialize)]
pub struct ServicePath {
    pub project: String,
    pub environment: String,
    pub service: String,
}

impl ServicePath {
    pub fn key(&self) -> ServiceKey {
        ServiceKey::new(&self.project, &self.environment, &self.service)
    }
}

/// `/services/:project/:environment/:service/releases/:id`
#[derive(Debug, Deserialize)]
pub struct ReleasePath {
    pub project: String,
    pub environment: String,
    pub service: String,
    pub id: u64,
}

/// Desired state for a service; the key comes from the path
#[derive(Debug, Deserialize)]
pub struct PutSpecRequest {
    pub version: ArtifactRef,
    pub replicas: u32,
    #[serde(default)]
    pub resources: ResourceLimits,
    #[serde(default)]
    pub strategy: RolloutStrategy,
    #[serde(default)]
    pub health: HealthCheckConfig,
}

/// Accepted desired state
#[derive(Debug, Serialize)]
pub struct PutSpecResponse {
    pub key: ServiceKey,
    pub version: ArtifactRef,
    pub generation: u64,
}

/// List services with a desired state or release history
pub async fn list_services(State(state): State<AppState>) -> ApiResult<Json<Vec<ServiceKey>>> {
    let services = state.plane.status.services().await?;
    Ok(Json(services))
}

/// Replace a service's desired state
pub async fn put_spec(
    State(state): State<AppState>,
    Path(path): Path<ServicePath>,
    Json(request): Json<PutSpecRequest>,
) -> ApiResult<(StatusCode, Json<PutSpecResponse>)> {
    let mut spec = ServiceSpec::new(path.key(), request.version, request.replicas)
        .with_strategy(request.strategy)
        .with_health(request.health);
    spec.resources = request.resources;

    let accepted = state.plane.admission.submit(spec).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(PutSpecResponse {
            key: accepted.key,
            version: accepted.version,
            generation: accepted.generation,
        }),
    ))
}

/// Desired state, current release and last observation of a service
pub async fn service_status(
    State(state): State<AppState>,
    Path(path): Path<ServicePath>,
) -> ApiResult<Json<ServiceStatus>> {
    let status = state.plane.status.service(&path.key()).await?;
    Ok(Json(status))
}

/// Release history, newest first
pub async fn list_releases(
    State(state): State<AppState>,
    Path(path): Path<ServicePath>,
) -> ApiResult<Json<Vec<ReleaseStatus>>> {
    let releases = state.plane.status.releases(&path.key()).await?;
    Ok(Json(releases))
}

/// Full record of one release
pub async fn get_release(
    State(state): State<AppState>,
    Path(path): Path<ReleasePath>,
) -> ApiResult<Json<Release>> {
    let key = ServiceKey::new(path.project, path.environment, path.service);
    let release = state
        .plane
        .status
        .release(&key, ReleaseId::new(path.id))
        .await?;
    Ok(Json(release))
}

/// Abort request body
#[derive(Debug, Default, Deserialize)]
pub struct AbortRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AbortResponse {
    pub release_id: ReleaseId,
    pub accepted: bool,
}

/// Ask the in-flight release to roll back
pub async fn abort_release(
    State(state): State<AppState>,
    Path(path): Path<ServicePath>,
    body: Option<Json<AbortRequest>>,
) -> ApiResult<(StatusCode, Json<AbortResponse>)> {
    let key = path.key();
    let request = body.map(|Json(b)| b).unwrap_or_default();
    let reason = request
        .reason
        .unwrap_or_else(|| "aborted by operator".to_string());

    let release_id = state.plane.operator.abort(&key, &reason).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(AbortResponse {
            release_id,
            accepted: true,
        }),
    ))
}

/// Rollback request body
#[derive(Debug, Default, Deserialize)]
pub struct RollbackRequest {
    /// Release whose spec becomes the desired state again
    #[serde(default)]
    pub to: Option<u64>,
}

/// Roll back to an earlier release, or abort the one in flight
pub async fn rollback_release(
    State(state): State<AppState>,
    Path(path): Path<ServicePath>,
    body: Option<Json<RollbackRequest>>,
) -> ApiResult<(StatusCode, Json<RollbackOutcome>)> {
    let key = path.key();
    let request = body.map(|Json(b)| b).unwrap_or_default();

    if request.to == Some(0) {
        return Err(ApiError::BadRequest("release ids start at 1".to_string()));
    }

    let outcome = state
        .plane
        .operator
        .rollback(&key, request.to.map(ReleaseId::new))
        .await?;

    Ok((StatusCode::ACCEPTED, Json(outcome)))
}
