//! Health signal ingestion

use super::services::ServicePath;
use crate::api::rest::state::AppState;
use crate::error::{ApiError, ApiResult};
use axum::{
    extract::{Path, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use switchyard_types::{ArtifactRef, Sample, SampleSource};

/// One request outcome or probe result
#[derive(Debug, Deserialize)]
pub struct SampleInput {
    /// Defaults to the time the batch is received
    #[serde(default)]
    pub at: Option<DateTime<Utc>>,
    pub success: bool,
    pub latency_ms: u64,
    #[serde(default)]
    pub source: SampleSource,
}

/// A batch of samples for one version of a service
#[derive(Debug, Deserialize)]
pub struct IngestSamplesRequest {
    pub version: ArtifactRef,
    pub samples: Vec<SampleInput>,
}

#[derive(Debug, Serialize)]
pub struct IngestSamplesResponse {
    pub recorded: usize,
}

/// Feed samples into the signal source used by health evaluation
pub async fn ingest_samples(
    State(state): State<AppState>,
    Path(path): Path<ServicePath>,
    Json(request): Json<IngestSamplesRequest>,
) -> ApiResult<Json<IngestSamplesResponse>> {
    if request.version.is_empty() {
        return Err(ApiError::BadRequest("version must not be empty".to_string()));
    }

    let key = path.key();
    let now = state.clock.now();
    let samples: Vec<Sample> = request
        .samples
        .into_iter()
        .map(|input| Sample {
            at: input.at.unwrap_or(now),
            success: input.success,
            latency_ms: input.latency_ms,
            source: input.source,
        })
        .collect();

    let recorded = samples.len();
    state.signals.record_all(&key, &request.version, samples);

    tracing::debug!(service = %key, version = %request.version, recorded, "Ingested samples");

    Ok(Json(IngestSamplesResponse { recorded }))
}
