//! Rollout error types

use switchyard_cluster::{ArtifactError, ClusterError};
use switchyard_health::HealthError;
use switchyard_types::{InvalidTransition, TrafficSplitError};
use thiserror::Error;

/// Errors raised while advancing a release
#[derive(Debug, Error)]
pub enum RolloutError {
    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),

    #[error("Health signals unavailable: {0}")]
    Signals(#[from] HealthError),

    #[error("Build pipeline error: {0}")]
    Artifacts(#[from] ArtifactError),

    #[error("Refusing to lower canary traffic from {current}% to {requested}% outside rollback")]
    NonMonotonic { current: u8, requested: u8 },

    #[error("Enforced canary traffic {observed}% is outside {requested}% ±{tolerance}")]
    OutOfTolerance {
        requested: u8,
        observed: u8,
        tolerance: u8,
    },

    #[error("Invalid traffic split: {0}")]
    Split(#[from] TrafficSplitError),

    #[error(transparent)]
    Transition(#[from] InvalidTransition),
}

impl RolloutError {
    /// Whether a later retry can succeed
    pub fn is_transient(&self) -> bool {
        match self {
            RolloutError::Cluster(e) => e.is_transient(),
            RolloutError::Signals(_)
            | RolloutError::Artifacts(_)
            | RolloutError::OutOfTolerance { .. } => true,
            RolloutError::NonMonotonic { .. }
            | RolloutError::Split(_)
            | RolloutError::Transition(_) => false,
        }
    }
}

/// Result type for rollout operations
pub type Result<T> = std::result::Result<T, RolloutError>;
