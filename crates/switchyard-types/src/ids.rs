//! Identifiers for services, artifacts and releases

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a deployable service within a project environment.
///
/// Every piece of per-service state (desired spec, releases, work queue
/// entries, cluster resources) is keyed by this triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceKey {
    pub project: String,
    pub environment: String,
    pub service: String,
}

impl ServiceKey {
    pub fn new(
        project: impl Into<String>,
        environment: impl Into<String>,
        service: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            environment: environment.into(),
            service: service.into(),
        }
    }

    /// Name of the cluster workload for a variant of this service
    pub fn workload_name(&self, variant: crate::Variant) -> String {
        format!("{}-{}", self.service, variant.suffix())
    }

    /// Cluster namespace hosting this service
    pub fn namespace(&self) -> String {
        format!("{}-{}", self.project, self.environment)
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.project, self.environment, self.service)
    }
}

/// Reference to an immutable build artifact (image digest or tag)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactRef(String);

impl ArtifactRef {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ArtifactRef {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Release identifier, monotonically increasing per service
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ReleaseId(u64);

impl ReleaseId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    /// The identifier that follows this one
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for ReleaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}
