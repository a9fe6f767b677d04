//! Desired-state admission
//!
//! The only synchronous failure path: a spec that is structurally invalid
//! or names an artifact the build pipeline has never heard of is rejected
//! here and never produces a release.

use crate::error::AdmissionError;
use crate::queue::WorkQueue;
use crate::store::DesiredStateStore;
use std::sync::Arc;
use switchyard_cluster::ArtifactRegistry;
use switchyard_types::{Clock, EventEnvelope, EventSource, ServiceSpec, SwitchyardEvent};
use tokio::sync::broadcast;
use tracing::{info, instrument, warn};

/// Validates and records desired states
pub struct Admission {
    desired: Arc<dyn DesiredStateStore>,
    artifacts: Arc<dyn ArtifactRegistry>,
    queue: Arc<WorkQueue>,
    clock: Arc<dyn Clock>,
    events: broadcast::Sender<EventEnvelope>,
}

impl Admission {
    pub fn new(
        desired: Arc<dyn DesiredStateStore>,
        artifacts: Arc<dyn ArtifactRegistry>,
        queue: Arc<WorkQueue>,
        clock: Arc<dyn Clock>,
        events: broadcast::Sender<EventEnvelope>,
    ) -> Self {
        Self {
            desired,
            artifacts,
            queue,
            clock,
            events,
        }
    }

    /// Accept `spec` as the desired state of its service.
    ///
    /// Returns the stored spec with its generation stamped.
    #[instrument(skip_all, fields(service = %spec.key, version = %spec.version))]
    pub async fn submit(&self, mut spec: ServiceSpec) -> Result<ServiceSpec, AdmissionError> {
        if let Err(e) = spec.validate() {
            warn!(service = %spec.key, error = %e, "Spec rejected");
            return Err(e.into());
        }

        if !self.artifacts.exists(&spec.key, &spec.version).await? {
            warn!(service = %spec.key, version = %spec.version, "Unknown artifact");
            return Err(AdmissionError::UnknownArtifact {
                key: spec.key,
                version: spec.version,
            });
        }

        spec.submitted_at = Some(self.clock.now());
        let stored = self.desired.put(spec).await?;

        info!(
            service = %stored.key,
            version = %stored.version,
            generation = stored.generation,
            strategy = stored.strategy.name(),
            "Desired state accepted"
        );
        self.queue.add(stored.key.clone());
        let _ = self.events.send(EventEnvelope::new(
            SwitchyardEvent::SpecAccepted {
                key: stored.key.clone(),
                version: stored.version.clone(),
                generation: stored.generation,
            },
            EventSource::Admission,
        ));

        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryDesiredStateStore;
    use switchyard_cluster::InMemoryArtifactRegistry;
    use switchyard_types::{ArtifactRef, ManualClock, RolloutStrategy, ServiceKey};

    struct Fixture {
        admission: Admission,
        desired: Arc<InMemoryDesiredStateStore>,
        artifacts: Arc<InMemoryArtifactRegistry>,
        queue: Arc<WorkQueue>,
        events: broadcast::Receiver<EventEnvelope>,
    }

    fn fixture() -> Fixture {
        let desired = Arc::new(InMemoryDesiredStateStore::new());
        let artifacts = Arc::new(InMemoryArtifactRegistry::new());
        let queue = Arc::new(WorkQueue::new());
        let (events_tx, events) = broadcast::channel(16);
        let admission = Admission::new(
            desired.clone(),
            artifacts.clone(),
            queue.clone(),
            Arc::new(ManualClock::starting_now()),
            events_tx,
        );
        Fixture {
            admission,
            desired,
            artifacts,
            queue,
            events,
        }
    }

    fn key() -> ServiceKey {
        ServiceKey::new("acme", "prod", "api")
    }

    #[tokio::test]
    async fn test_accepts_known_artifact() {
        let mut f = fixture();
        f.artifacts.register(&key(), &ArtifactRef::new("api:v2"));

        let stored = f
            .admission
            .submit(ServiceSpec::new(key(), "api:v2", 3))
            .await
            .unwrap();

        assert_eq!(stored.generation, 1);
        assert!(stored.submitted_at.is_some());
        assert_eq!(f.queue.stats().ready, 1);
        assert!(f.desired.get(&key()).await.unwrap().is_some());

        let envelope = f.events.recv().await.unwrap();
        assert!(matches!(
            envelope.event,
            SwitchyardEvent::SpecAccepted { generation: 1, .. }
        ));
    }

    #[tokio::test]
    async fn test_rejects_unknown_artifact() {
        let f = fixture();

        let err = f
            .admission
            .submit(ServiceSpec::new(key(), "api:ghost", 3))
            .await
            .unwrap_err();

        assert!(matches!(err, AdmissionError::UnknownArtifact { .. }));
        assert!(f.desired.get(&key()).await.unwrap().is_none());
        assert_eq!(f.queue.stats().ready, 0);
    }

    #[tokio::test]
    async fn test_rejects_invalid_schedule() {
        let f = fixture();
        f.artifacts.register(&key(), &ArtifactRef::new("api:v2"));

        let spec = ServiceSpec::new(key(), "api:v2", 3).with_strategy(RolloutStrategy::Canary {
            steps: vec![50, 10, 100],
        });
        let err = f.admission.submit(spec).await.unwrap_err();

        assert!(matches!(err, AdmissionError::Invalid(_)));
    }
}
