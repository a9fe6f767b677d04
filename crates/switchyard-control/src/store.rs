//! Desired-state and release stores
//!
//! The desired-state store is written by admission and read by the
//! reconciler. The release store is written only by the worker that owns a
//! service key; every write is compare-and-swap on the release generation.

use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use switchyard_types::{Release, ReleaseId, ServiceKey, ServiceSpec};
use tokio::sync::RwLock;

/// Durable record of the desired state per service
#[async_trait]
pub trait DesiredStateStore: Send + Sync {
    /// Store `spec` as the desired state, stamping the next generation
    async fn put(&self, spec: ServiceSpec) -> StoreResult<ServiceSpec>;

    async fn get(&self, key: &ServiceKey) -> StoreResult<Option<ServiceSpec>>;

    async fn list_keys(&self) -> StoreResult<Vec<ServiceKey>>;
}

/// Release records and history per service
#[async_trait]
pub trait ReleaseStore: Send + Sync {
    /// Reserve the next release id for a service
    async fn next_id(&self, key: &ServiceKey) -> StoreResult<ReleaseId>;

    /// Insert a new release. Fails if the service already has an active one.
    async fn create(&self, release: Release) -> StoreResult<()>;

    /// Replace a stored release if its generation still equals `expected_generation`
    async fn save(&self, release: &Release, expected_generation: u64) -> StoreResult<()>;

    async fn get(&self, key: &ServiceKey, id: ReleaseId) -> StoreResult<Option<Release>>;

    /// The non-terminal release of a service, if any
    async fn active(&self, key: &ServiceKey) -> StoreResult<Option<Release>>;

    /// Most recently created release of a service
    async fn latest(&self, key: &ServiceKey) -> StoreResult<Option<Release>>;

    /// All releases of a service, oldest first
    async fn history(&self, key: &ServiceKey) -> StoreResult<Vec<Release>>;
}

/// In-memory desired-state store for development and testing
#[derive(Debug, Default)]
pub struct InMemoryDesiredStateStore {
    specs: Arc<RwLock<HashMap<ServiceKey, ServiceSpec>>>,
}

impl InMemoryDesiredStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DesiredStateStore for InMemoryDesiredStateStore {
    async fn put(&self, mut spec: ServiceSpec) -> StoreResult<ServiceSpec> {
        let mut specs = self.specs.write().await;
        spec.generation = specs
            .get(&spec.key)
            .map(|current| current.generation + 1)
            .unwrap_or(1);
        specs.insert(spec.key.clone(), spec.clone());
        Ok(spec)
    }

    async fn get(&self, key: &ServiceKey) -> StoreResult<Option<ServiceSpec>> {
        let specs = self.specs.read().await;
        Ok(specs.get(key).cloned())
    }

    async fn list_keys(&self) -> StoreResult<Vec<ServiceKey>> {
        let specs = self.specs.read().await;
        let mut keys: Vec<_> = specs.keys().cloned().collect();
        keys.sort_by_key(|k| k.to_string());
        Ok(keys)
    }
}

#[derive(Debug, Default)]
struct ServiceReleases {
    last_id: u64,
    releases: Vec<Release>,
}

impl ServiceReleases {
    fn active(&self) -> Option<&Release> {
        self.releases.iter().find(|r| r.is_active())
    }
}

/// In-memory release store for development and testing
#[derive(Debug, Default)]
pub struct InMemoryReleaseStore {
    services: Arc<RwLock<HashMap<ServiceKey, ServiceReleases>>>,
}

impl InMemoryReleaseStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReleaseStore for InMemoryReleaseStore {
    async fn next_id(&self, key: &ServiceKey) -> StoreResult<ReleaseId> {
        let mut services = self.services.write().await;
        let entry = services.entry(key.clone()).or_default();
        entry.last_id += 1;
        Ok(ReleaseId::new(entry.last_id))
    }

    async fn create(&self, release: Release) -> StoreResult<()> {
        let mut services = self.services.write().await;
        let entry = services.entry(release.key().clone()).or_default();

        if let Some(active) = entry.active() {
            return Err(StoreError::ActiveReleaseExists {
                key: release.key().clone(),
                active: active.id,
            });
        }
        if entry.releases.iter().any(|r| r.id == release.id) {
            return Err(StoreError::DuplicateRelease(release.id));
        }

        entry.last_id = entry.last_id.max(release.id.get());
        entry.releases.push(release);
        Ok(())
    }

    async fn save(&self, release: &Release, expected_generation: u64) -> StoreResult<()> {
        let mut services = self.services.write().await;
        let stored = services
            .get_mut(release.key())
            .and_then(|s| s.releases.iter_mut().find(|r| r.id == release.id))
            .ok_or_else(|| StoreError::NotFound(format!("release {} of {}", release.id, release.key())))?;

        if stored.phase.is_terminal() {
            return Err(StoreError::Immutable(release.id));
        }
        if stored.generation != expected_generation {
            return Err(StoreError::GenerationMismatch {
                expected: expected_generation,
                actual: stored.generation,
            });
        }

        *stored = release.clone();
        Ok(())
    }

    async fn get(&self, key: &ServiceKey, id: ReleaseId) -> StoreResult<Option<Release>> {
        let services = self.services.read().await;
        Ok(services
            .get(key)
            .and_then(|s| s.releases.iter().find(|r| r.id == id))
            .cloned())
    }

    async fn active(&self, key: &ServiceKey) -> StoreResult<Option<Release>> {
        let services = self.services.read().await;
        Ok(services.get(key).and_then(|s| s.active()).cloned())
    }

    async fn latest(&self, key: &ServiceKey) -> StoreResult<Option<Release>> {
        let services = self.services.read().await;
        Ok(services
            .get(key)
            .and_then(|s| s.releases.iter().max_by_key(|r| r.id))
            .cloned())
    }

    async fn history(&self, key: &ServiceKey) -> StoreResult<Vec<Release>> {
        let services = self.services.read().await;
        let mut releases = services
            .get(key)
            .map(|s| s.releases.clone())
            .unwrap_or_default();
        releases.sort_by_key(|r| r.id);
        Ok(releases)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use switchyard_types::ReleasePhase;

    fn key() -> ServiceKey {
        ServiceKey::new("acme", "prod", "api")
    }

    fn release(id: u64, version: &str) -> Release {
        Release::new(
            ReleaseId::new(id),
            ServiceSpec::new(key(), version, 2),
            None,
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_put_stamps_generation() {
        let store = InMemoryDesiredStateStore::new();

        let first = store.put(ServiceSpec::new(key(), "api:v1", 2)).await.unwrap();
        let second = store.put(ServiceSpec::new(key(), "api:v2", 2)).await.unwrap();

        assert_eq!(first.generation, 1);
        assert_eq!(second.generation, 2);
        let stored = store.get(&key()).await.unwrap().unwrap();
        assert_eq!(stored.version.as_str(), "api:v2");
        assert_eq!(store.list_keys().await.unwrap(), vec![key()]);
    }

    #[tokio::test]
    async fn test_single_active_release() {
        let store = InMemoryReleaseStore::new();
        store.create(release(1, "api:v1")).await.unwrap();

        let err = store.create(release(2, "api:v2")).await.unwrap_err();
        assert!(matches!(err, StoreError::ActiveReleaseExists { .. }));

        let mut first = store.active(&key()).await.unwrap().unwrap();
        let generation = first.generation;
        first
            .transition(ReleasePhase::Failed, "test", Utc::now())
            .unwrap();
        store.save(&first, generation).await.unwrap();

        store.create(release(2, "api:v2")).await.unwrap();
        assert_eq!(store.history(&key()).await.unwrap().len(), 2);
        assert_eq!(store.latest(&key()).await.unwrap().unwrap().id, ReleaseId::new(2));
    }

    #[tokio::test]
    async fn test_save_is_compare_and_swap() {
        let store = InMemoryReleaseStore::new();
        store.create(release(1, "api:v1")).await.unwrap();

        let mut a = store.active(&key()).await.unwrap().unwrap();
        let mut b = a.clone();
        let base = a.generation;

        a.transition(ReleasePhase::Deploying, "a", Utc::now()).unwrap();
        store.save(&a, base).await.unwrap();

        b.transition(ReleasePhase::Failed, "b", Utc::now()).unwrap();
        let err = store.save(&b, base).await.unwrap_err();
        assert!(matches!(err, StoreError::GenerationMismatch { .. }));
    }

    #[tokio::test]
    async fn test_terminal_release_is_immutable() {
        let store = InMemoryReleaseStore::new();
        store.create(release(1, "api:v1")).await.unwrap();

        let mut r = store.active(&key()).await.unwrap().unwrap();
        let base = r.generation;
        r.transition(ReleasePhase::Failed, "done", Utc::now()).unwrap();
        store.save(&r, base).await.unwrap();

        let base = r.generation;
        r.note(switchyard_types::ReleaseNoteKind::Aborted, "late", Utc::now());
        assert_eq!(
            store.save(&r, base).await.unwrap_err(),
            StoreError::Immutable(ReleaseId::new(1))
        );
    }

    #[tokio::test]
    async fn test_next_id_is_per_service() {
        let store = InMemoryReleaseStore::new();
        let other = ServiceKey::new("acme", "prod", "web");

        assert_eq!(store.next_id(&key()).await.unwrap(), ReleaseId::new(1));
        assert_eq!(store.next_id(&key()).await.unwrap(), ReleaseId::new(2));
        assert_eq!(store.next_id(&other).await.unwrap(), ReleaseId::new(1));
    }
}
