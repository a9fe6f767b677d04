//! Shared world for control plane scenarios

#![allow(dead_code)]

use std::sync::Arc;
use switchyard_cluster::{ClusterClient, InMemoryArtifactRegistry, InMemoryCluster};
use switchyard_control::{
    Action, ControlPlane, ControlPlaneConfig, ControlPlaneDeps, InMemoryDesiredStateStore,
    InMemoryReleaseStore, ReconcilerConfig, ReleaseStore, SupersedePolicy,
};
use switchyard_health::InMemorySignalSource;
use switchyard_types::{
    ArtifactRef, Clock, ClusterObservation, ManualClock, Release, ReleasePhase, RolloutStrategy, Sample,
    ServiceKey, ServiceSpec,
};

pub struct World {
    pub plane: ControlPlane,
    pub cluster: Arc<InMemoryCluster>,
    pub artifacts: Arc<InMemoryArtifactRegistry>,
    pub signals: Arc<InMemorySignalSource>,
    pub releases: Arc<InMemoryReleaseStore>,
    pub clock: Arc<ManualClock>,
    pub key: ServiceKey,
}

impl World {
    /// A service already running `api:v1` on two replicas
    pub fn running_v1(policy: SupersedePolicy) -> Self {
        let world = Self::empty(policy);
        world.cluster.seed_stable(&world.key, "api:v1", 2);
        world
    }

    pub fn empty(policy: SupersedePolicy) -> Self {
        let clock = Arc::new(ManualClock::starting_now());
        let cluster = Arc::new(InMemoryCluster::new(clock.clone()));
        let artifacts = Arc::new(InMemoryArtifactRegistry::new());
        let signals = Arc::new(InMemorySignalSource::new());
        let releases = Arc::new(InMemoryReleaseStore::new());

        let plane = ControlPlane::new(
            ControlPlaneDeps {
                desired: Arc::new(InMemoryDesiredStateStore::new()),
                releases: releases.clone(),
                cluster: cluster.clone(),
                artifacts: artifacts.clone(),
                signals: signals.clone(),
                clock: clock.clone(),
            },
            ControlPlaneConfig {
                reconciler: ReconcilerConfig {
                    supersede: policy,
                    ..Default::default()
                },
                ..Default::default()
            },
        );

        Self {
            plane,
            cluster,
            artifacts,
            signals,
            releases,
            clock,
            key: ServiceKey::new("acme", "prod", "api"),
        }
    }

    pub fn publish(&self, version: &str) {
        self.artifacts
            .mark_ready(&self.key, &ArtifactRef::new(version));
    }

    pub fn spec(&self, version: &str, steps: &[u8]) -> ServiceSpec {
        ServiceSpec::new(self.key.clone(), version, 2).with_strategy(RolloutStrategy::Canary {
            steps: steps.to_vec(),
        })
    }

    /// Publish and submit a canary rollout of `version`
    pub async fn deploy(&self, version: &str, steps: &[u8]) -> ServiceSpec {
        self.publish(version);
        self.plane
            .admission
            .submit(self.spec(version, steps))
            .await
            .expect("spec accepted")
    }

    pub async fn pass(&self) -> Action {
        self.plane.reconciler.reconcile(&self.key).await
    }

    pub async fn active(&self) -> Option<Release> {
        self.releases.active(&self.key).await.unwrap()
    }

    pub async fn latest(&self) -> Option<Release> {
        self.releases.latest(&self.key).await.unwrap()
    }

    pub async fn history(&self) -> Vec<Release> {
        self.releases.history(&self.key).await.unwrap()
    }

    pub async fn observe(&self) -> ClusterObservation {
        self.cluster.observe(&self.key).await.unwrap()
    }

    /// Record a window's worth of samples for the release under evaluation.
    /// At `errors_at` percent canary traffic, 5% of them fail.
    fn feed(&self, release: &Release, errors_at: Option<u8>) {
        let now = self.clock.now();
        let failing = errors_at == Some(release.traffic.canary_percent());
        for i in 0..60 {
            let sample = if failing && i % 20 == 0 {
                Sample::error(now, 40)
            } else {
                Sample::ok(now, 40)
            };
            self.signals.record(&self.key, release.target_version(), sample);
        }
    }

    /// Run one pass and honour its requeue delay on the manual clock,
    /// feeding samples while a release holds a traffic step
    pub async fn tick(&self, errors_at: Option<u8>) -> Action {
        let action = self.pass().await;
        if let Action::Requeue(delay) = action {
            self.clock.advance(delay);
            if let Some(active) = self.active().await {
                if active.phase == ReleasePhase::Evaluating {
                    self.feed(&active, errors_at);
                }
            }
        }
        action
    }

    /// Tick until the loop has nothing left to do
    pub async fn settle(&self, errors_at: Option<u8>) -> Option<Release> {
        for _ in 0..500 {
            if self.tick(errors_at).await == Action::AwaitChange {
                return self.latest().await;
            }
        }
        panic!("reconcile loop did not settle: {:?}", self.active().await.map(|r| r.phase));
    }

    /// Tick until the active release satisfies `done`
    pub async fn tick_until(&self, done: impl Fn(&Release) -> bool) -> Release {
        for _ in 0..500 {
            if let Some(active) = self.active().await {
                if done(&active) {
                    return active;
                }
            }
            self.tick(None).await;
        }
        panic!("condition not reached");
    }

    pub async fn active_count(&self) -> usize {
        self.history().await.iter().filter(|r| r.is_active()).count()
    }
}
