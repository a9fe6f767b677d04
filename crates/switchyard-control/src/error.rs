//! Control plane error types

use switchyard_cluster::{ArtifactError, ClusterError};
use switchyard_rollout::RolloutError;
use switchyard_types::{ArtifactRef, ReleaseId, ReleaseNoteKind, ServiceKey, SpecValidationError};
use thiserror::Error;

/// Errors from the desired-state and release stores
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Service {key} already has active release {active}")]
    ActiveReleaseExists { key: ServiceKey, active: ReleaseId },

    #[error("Release {0} already exists")]
    DuplicateRelease(ReleaseId),

    #[error("Release {0} is terminal and cannot be modified")]
    Immutable(ReleaseId),

    #[error("Stale write: expected generation {expected}, stored {actual}")]
    GenerationMismatch { expected: u64, actual: u64 },

    #[error("Storage error: {0}")]
    Storage(String),
}

/// Failure taxonomy of a reconcile pass.
///
/// Each kind maps onto the note recorded on the affected release.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Transient infrastructure error: {0}")]
    TransientInfra(String),

    #[error("Invalid desired state: {0}")]
    SpecInvalid(String),

    #[error("Health degraded: {0}")]
    HealthDegraded(String),

    #[error("Convergence timeout: {0}")]
    ConvergenceTimeout(String),

    #[error("Rollback cleanup failed: {0}")]
    RollbackFailure(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl ReconcileError {
    /// Whether the key should be requeued with backoff
    pub fn is_retryable(&self) -> bool {
        match self {
            ReconcileError::TransientInfra(_) => true,
            // A stale write means another pass got there first; retry on fresh state
            ReconcileError::Store(StoreError::GenerationMismatch { .. }) => true,
            ReconcileError::Store(StoreError::Storage(_)) => true,
            _ => false,
        }
    }

    pub fn note_kind(&self) -> ReleaseNoteKind {
        match self {
            ReconcileError::TransientInfra(_) | ReconcileError::Store(_) => {
                ReleaseNoteKind::TransientInfra
            }
            ReconcileError::SpecInvalid(_) => ReleaseNoteKind::SpecInvalid,
            ReconcileError::HealthDegraded(_) => ReleaseNoteKind::HealthDegraded,
            ReconcileError::ConvergenceTimeout(_) => ReleaseNoteKind::ConvergenceTimeout,
            ReconcileError::RollbackFailure(_) => ReleaseNoteKind::RollbackFailure,
        }
    }
}

impl From<RolloutError> for ReconcileError {
    fn from(err: RolloutError) -> Self {
        if err.is_transient() {
            ReconcileError::TransientInfra(err.to_string())
        } else {
            ReconcileError::SpecInvalid(err.to_string())
        }
    }
}

impl From<ClusterError> for ReconcileError {
    fn from(err: ClusterError) -> Self {
        if err.is_transient() {
            ReconcileError::TransientInfra(err.to_string())
        } else {
            ReconcileError::SpecInvalid(err.to_string())
        }
    }
}

/// Errors returned synchronously when a desired state is submitted
#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("Invalid spec: {0}")]
    Invalid(#[from] SpecValidationError),

    #[error("Artifact {version} is unknown to the build pipeline for {key}")]
    UnknownArtifact { key: ServiceKey, version: ArtifactRef },

    #[error("Build pipeline error: {0}")]
    BuildPipeline(#[from] ArtifactError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Errors from operator and status operations
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("No release to roll back to for {0}")]
    NoRollbackTarget(ServiceKey),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Admission error: {0}")]
    Admission(#[from] AdmissionError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl ControlError {
    pub fn no_active_release(key: &ServiceKey) -> Self {
        ControlError::NotFound(format!("no active release for {key}"))
    }

    pub fn release_not_found(key: &ServiceKey, id: ReleaseId) -> Self {
        ControlError::NotFound(format!("release {id} of {key}"))
    }

    pub fn service_not_found(key: &ServiceKey) -> Self {
        ControlError::NotFound(format!("service {key}"))
    }
}

/// Result type for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Result type for control plane operations
pub type Result<T> = std::result::Result<T, ControlError>;
