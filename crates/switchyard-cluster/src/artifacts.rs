//! Build pipeline signals
//!
//! Admission asks whether an artifact exists at all; the release state
//! machine holds `Pending` until the artifact is ready to run.

use crate::error::ArtifactError;
use async_trait::async_trait;
use dashmap::DashMap;
use switchyard_types::{ArtifactRef, ServiceKey};

/// Build pipeline collaborator
#[async_trait]
pub trait ArtifactRegistry: Send + Sync {
    /// Whether the pipeline knows this artifact, built or building
    async fn exists(&self, key: &ServiceKey, version: &ArtifactRef)
        -> Result<bool, ArtifactError>;

    /// Whether the artifact-ready signal has been received
    async fn is_ready(
        &self,
        key: &ServiceKey,
        version: &ArtifactRef,
    ) -> Result<bool, ArtifactError>;
}

/// In-memory build pipeline
#[derive(Debug, Default)]
pub struct InMemoryArtifactRegistry {
    artifacts: DashMap<(ServiceKey, ArtifactRef), bool>,
}

impl InMemoryArtifactRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an artifact whose build is in progress
    pub fn register(&self, key: &ServiceKey, version: &ArtifactRef) {
        self.artifacts
            .entry((key.clone(), version.clone()))
            .or_insert(false);
    }

    /// Record the artifact-ready signal, registering the artifact if needed
    pub fn mark_ready(&self, key: &ServiceKey, version: &ArtifactRef) {
        self.artifacts.insert((key.clone(), version.clone()), true);
        tracing::debug!(service = %key, version = %version, "Artifact ready");
    }
}

#[async_trait]
impl ArtifactRegistry for InMemoryArtifactRegistry {
    async fn exists(
        &self,
        key: &ServiceKey,
        version: &ArtifactRef,
    ) -> Result<bool, ArtifactError> {
        Ok(self
            .artifacts
            .contains_key(&(key.clone(), version.clone())))
    }

    async fn is_ready(
        &self,
        key: &ServiceKey,
        version: &ArtifactRef,
    ) -> Result<bool, ArtifactError> {
        Ok(self
            .artifacts
            .get(&(key.clone(), version.clone()))
            .map(|ready| *ready)
            .unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_then_ready() {
        let registry = InMemoryArtifactRegistry::new();
        let key = ServiceKey::new("acme", "prod", "api");
        let v2 = ArtifactRef::new("api:v2");

        assert!(!registry.exists(&key, &v2).await.unwrap());

        registry.register(&key, &v2);
        assert!(registry.exists(&key, &v2).await.unwrap());
        assert!(!registry.is_ready(&key, &v2).await.unwrap());

        registry.mark_ready(&key, &v2);
        assert!(registry.is_ready(&key, &v2).await.unwrap());

        // Registering again must not clear readiness
        registry.register(&key, &v2);
        assert!(registry.is_ready(&key, &v2).await.unwrap());
    }
}
