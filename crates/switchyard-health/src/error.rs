//! Health error types

use thiserror::Error;

/// Errors from health signal sourcing
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HealthError {
    #[error("Signal source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Signal query failed: {0}")]
    Query(String),
}

/// Result type for health operations
pub type Result<T> = std::result::Result<T, HealthError>;
