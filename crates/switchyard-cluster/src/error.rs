//! Cluster error types

use switchyard_types::{ServiceKey, TrafficSplitError, Variant};
use thiserror::Error;

/// Errors returned by the orchestrator
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ClusterError {
    #[error("Cluster API unavailable: {0}")]
    Unavailable(String),

    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Mutation rejected: {0}")]
    Rejected(String),

    #[error("No {variant:?} workload for {key}")]
    WorkloadMissing { key: ServiceKey, variant: Variant },

    #[error("Invalid traffic split: {0}")]
    InvalidSplit(#[from] TrafficSplitError),
}

impl ClusterError {
    /// Whether retrying the same call later can succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, ClusterError::Unavailable(_))
    }
}

/// Errors returned by the build pipeline
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ArtifactError {
    #[error("Build pipeline unavailable: {0}")]
    Unavailable(String),
}

/// Result type for cluster operations
pub type Result<T> = std::result::Result<T, ClusterError>;
