//! Reconciliation loop body
//!
//! `reconcile(key)` compares the desired state of one service with its
//! active release and the live cluster, then does at most one step of work.
//! It never sleeps: every wait comes back as an [`Action::Requeue`].
//!
//! Passes for the same key are serialized by a keyed async lock, on top of
//! the work queue's one-in-flight-per-key rule.

use crate::backoff::Backoff;
use crate::error::ReconcileError;
use crate::operator::{CommandMailbox, OperatorCommand};
use crate::store::{DesiredStateStore, ReleaseStore};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use switchyard_cluster::ClusterObserver;
use switchyard_rollout::{ReleaseStateMachine, StepOutcome};
use switchyard_types::{
    Clock, ClusterObservation, EventEnvelope, EventSource, Release, ReleaseNoteKind,
    ReleasePhase, ServiceKey, ServiceSpec, SwitchyardEvent,
};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info, instrument, warn};

/// What the caller should do with the key after a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Run again after the delay
    Requeue(Duration),
    /// Nothing to do until the desired state or the cluster changes
    AwaitChange,
}

/// How a newer desired state treats a release already in flight
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupersedePolicy {
    /// Roll back the in-flight release, then start the newest spec
    #[default]
    LatestWins,
    /// Let the in-flight release finish, then start the newest spec
    QueueAfterCompletion,
}

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub supersede: SupersedePolicy,
    pub backoff: Backoff,
    /// Upper bound for any wait-driven requeue
    pub max_requeue: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            supersede: SupersedePolicy::default(),
            backoff: Backoff::default(),
            max_requeue: Duration::from_secs(30),
        }
    }
}

/// Collaborators the reconciler reads and writes
pub struct ReconcilerDeps {
    pub desired: Arc<dyn DesiredStateStore>,
    pub releases: Arc<dyn ReleaseStore>,
    pub observer: Arc<ClusterObserver>,
    pub mailbox: Arc<CommandMailbox>,
    pub clock: Arc<dyn Clock>,
    pub events: broadcast::Sender<EventEnvelope>,
}

/// Drives each service toward its desired state
pub struct Reconciler {
    desired: Arc<dyn DesiredStateStore>,
    releases: Arc<dyn ReleaseStore>,
    observer: Arc<ClusterObserver>,
    mailbox: Arc<CommandMailbox>,
    clock: Arc<dyn Clock>,
    events: broadcast::Sender<EventEnvelope>,
    machine: ReleaseStateMachine,
    locks: DashMap<ServiceKey, Arc<Mutex<()>>>,
    failures: DashMap<ServiceKey, u32>,
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(deps: ReconcilerDeps, machine: ReleaseStateMachine, config: ReconcilerConfig) -> Self {
        Self {
            desired: deps.desired,
            releases: deps.releases,
            observer: deps.observer,
            mailbox: deps.mailbox,
            clock: deps.clock,
            events: deps.events,
            machine,
            locks: DashMap::new(),
            failures: DashMap::new(),
            config,
        }
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Consecutive failed passes for `key`
    pub fn failures(&self, key: &ServiceKey) -> u32 {
        self.failures.get(key).map(|n| *n).unwrap_or(0)
    }

    /// Run one reconcile pass for `key`
    #[instrument(skip(self), fields(service = %key))]
    pub async fn reconcile(&self, key: &ServiceKey) -> Action {
        let lock = self.locks.entry(key.clone()).or_default().clone();
        let _guard = lock.lock().await;

        match self.reconcile_locked(key).await {
            Ok(action) => {
                self.failures.remove(key);
                action
            }
            Err(e) if e.is_retryable() => {
                let attempt = {
                    let mut failures = self.failures.entry(key.clone()).or_insert(0);
                    *failures += 1;
                    *failures
                };
                let delay = self.config.backoff.delay(attempt);
                warn!(
                    service = %key,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Reconcile failed, backing off"
                );
                Action::Requeue(delay)
            }
            Err(e) => {
                error!(service = %key, error = %e, "Reconcile failed");
                self.failures.remove(key);
                Action::AwaitChange
            }
        }
    }

    async fn reconcile_locked(&self, key: &ServiceKey) -> Result<Action, ReconcileError> {
        let spec = self.desired.get(key).await?;
        let commands = self.mailbox.take(key);

        match self.releases.active(key).await? {
            Some(release) => self.advance(release, spec, commands).await,
            None => {
                if !commands.is_empty() {
                    debug!(service = %key, count = commands.len(), "No active release, dropping commands");
                }
                match spec {
                    Some(spec) => self.start_release(key, spec).await,
                    None => Ok(Action::AwaitChange),
                }
            }
        }
    }

    /// Apply pending commands and supersession, step once, then persist
    async fn advance(
        &self,
        mut release: Release,
        spec: Option<ServiceSpec>,
        commands: Vec<OperatorCommand>,
    ) -> Result<Action, ReconcileError> {
        let base = release.generation;

        for command in commands {
            match command {
                OperatorCommand::Abort { reason } => {
                    self.machine
                        .abort(&mut release, ReleaseNoteKind::Aborted, &reason);
                }
            }
        }

        // A newer generation of the same version waits for this release
        if let Some(newer) = spec.filter(|s| {
            s.generation > release.spec.generation && s.version != *release.target_version()
        }) {
            self.supersede_if_needed(&mut release, &newer);
        }

        let result = self.step(&mut release).await;
        if let Err(e) = &result {
            if e.is_retryable() {
                self.note_transient(&mut release, e);
            }
        }

        if release.generation != base {
            self.releases.save(&release, base).await?;
        }
        result
    }

    fn supersede_if_needed(&self, release: &mut Release, newer: &ServiceSpec) {
        if self.config.supersede != SupersedePolicy::LatestWins {
            return;
        }

        let reason = format!(
            "superseded by {} (generation {})",
            newer.version, newer.generation
        );
        if self
            .machine
            .abort(release, ReleaseNoteKind::Superseded, &reason)
        {
            info!(
                service = %release.key(),
                release_id = %release.id,
                superseded_by = %newer.version,
                "Release superseded"
            );
            self.emit(SwitchyardEvent::ReleaseSuperseded {
                key: release.key().clone(),
                release_id: release.id,
                superseded_by: newer.version.clone(),
            });
        }
    }

    async fn step(&self, release: &mut Release) -> Result<Action, ReconcileError> {
        let key = release.key().clone();

        let observed = match self.observer.refresh(&key).await {
            Ok(observed) => observed,
            Err(e) => match self.cached_for_rollback(release) {
                Some(cached) => {
                    warn!(service = %key, error = %e, "Observation failed, rolling back on cached state");
                    cached
                }
                None => {
                    if let Some(StepOutcome::Finished(outcome)) =
                        self.machine.expire_if_stalled(release, None).await?
                    {
                        info!(service = %key, release_id = %release.id, outcome = ?outcome, "Release finished");
                        return Ok(Action::Requeue(Duration::ZERO));
                    }
                    return Err(e.into());
                }
            },
        };

        match self.machine.step(release, &observed).await? {
            StepOutcome::Advanced => Ok(Action::Requeue(Duration::ZERO)),
            StepOutcome::Wait(delay) => Ok(Action::Requeue(delay.min(self.config.max_requeue))),
            StepOutcome::Finished(outcome) => {
                info!(service = %key, release_id = %release.id, outcome = ?outcome, "Release finished");
                // Pick up any desired state that arrived meanwhile
                Ok(Action::Requeue(Duration::ZERO))
            }
        }
    }

    fn cached_for_rollback(&self, release: &Release) -> Option<ClusterObservation> {
        if release.phase != ReleasePhase::RollingBack {
            return None;
        }
        self.observer.latest(release.key())
    }

    fn note_transient(&self, release: &mut Release, error: &ReconcileError) {
        let message = error.to_string();
        let repeated = release
            .notes
            .last()
            .is_some_and(|n| n.kind == ReleaseNoteKind::TransientInfra && n.message == message);
        if !repeated {
            release.note(error.note_kind(), message, self.clock.now());
        }
    }

    /// Create a release for `spec` unless it is already handled or running
    async fn start_release(
        &self,
        key: &ServiceKey,
        spec: ServiceSpec,
    ) -> Result<Action, ReconcileError> {
        let latest = self.releases.latest(key).await?;
        if latest.is_some_and(|r| r.spec.generation >= spec.generation) {
            return Ok(Action::AwaitChange);
        }

        let observed = self.observer.refresh(key).await?;
        let running = observed.stable_version().cloned();
        if running.as_ref() == Some(&spec.version) {
            debug!(service = %key, version = %spec.version, "Desired version already running");
            return Ok(Action::AwaitChange);
        }

        let id = self.releases.next_id(key).await?;
        let release = Release::new(id, spec, running, self.clock.now());

        info!(
            service = %key,
            release_id = %id,
            version = %release.target_version(),
            previous_version = ?release.previous_version.as_ref().map(|v| v.as_str()),
            strategy = release.spec.strategy.name(),
            "Release created"
        );
        let event = SwitchyardEvent::ReleaseCreated {
            key: key.clone(),
            release_id: id,
            version: release.target_version().clone(),
            previous_version: release.previous_version.clone(),
        };
        self.releases.create(release).await?;
        self.emit(event);

        Ok(Action::Requeue(Duration::ZERO))
    }

    fn emit(&self, event: SwitchyardEvent) {
        let _ = self
            .events
            .send(EventEnvelope::new(event, EventSource::Reconciler));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryDesiredStateStore, InMemoryReleaseStore};
    use switchyard_cluster::{ClusterClient, ClusterError, InMemoryArtifactRegistry, InMemoryCluster};
    use switchyard_health::InMemorySignalSource;
    use switchyard_rollout::{MachineConfig, MachineDeps};
    use switchyard_types::{ArtifactRef, ManualClock, ReleaseOutcome};

    struct Fixture {
        reconciler: Reconciler,
        desired: Arc<InMemoryDesiredStateStore>,
        releases: Arc<InMemoryReleaseStore>,
        cluster: Arc<InMemoryCluster>,
        mailbox: Arc<CommandMailbox>,
        key: ServiceKey,
    }

    fn fixture(config: ReconcilerConfig) -> Fixture {
        let clock = Arc::new(ManualClock::starting_now());
        let cluster = Arc::new(InMemoryCluster::new(clock.clone()));
        let artifacts = Arc::new(InMemoryArtifactRegistry::new());
        let desired = Arc::new(InMemoryDesiredStateStore::new());
        let releases = Arc::new(InMemoryReleaseStore::new());
        let mailbox = Arc::new(CommandMailbox::new());
        let (events, _) = broadcast::channel(256);
        let key = ServiceKey::new("acme", "prod", "api");

        cluster.seed_stable(&key, "api:v1", 2);
        artifacts.mark_ready(&key, &ArtifactRef::new("api:v2"));

        let machine = ReleaseStateMachine::new(
            MachineDeps {
                cluster: cluster.clone(),
                artifacts,
                signals: Arc::new(InMemorySignalSource::new()),
                clock: clock.clone(),
                events: events.clone(),
            },
            MachineConfig::default(),
        );
        let reconciler = Reconciler::new(
            ReconcilerDeps {
                desired: desired.clone(),
                releases: releases.clone(),
                observer: Arc::new(ClusterObserver::new(cluster.clone())),
                mailbox: mailbox.clone(),
                clock,
                events,
            },
            machine,
            config,
        );

        Fixture {
            reconciler,
            desired,
            releases,
            cluster,
            mailbox,
            key,
        }
    }

    #[tokio::test]
    async fn test_no_desired_state_awaits_change() {
        let f = fixture(ReconcilerConfig::default());
        assert_eq!(f.reconciler.reconcile(&f.key).await, Action::AwaitChange);
        assert!(f.releases.latest(&f.key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_creates_release_once_per_generation() {
        let f = fixture(ReconcilerConfig::default());
        f.desired
            .put(ServiceSpec::new(f.key.clone(), "api:v2", 2))
            .await
            .unwrap();

        assert_eq!(
            f.reconciler.reconcile(&f.key).await,
            Action::Requeue(Duration::ZERO)
        );
        let release = f.releases.active(&f.key).await.unwrap().unwrap();
        assert_eq!(release.previous_version, Some(ArtifactRef::new("api:v1")));
        assert_eq!(release.phase, ReleasePhase::Pending);
        assert_eq!(f.releases.history(&f.key).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_running_version_needs_no_release() {
        let f = fixture(ReconcilerConfig::default());
        f.desired
            .put(ServiceSpec::new(f.key.clone(), "api:v1", 2))
            .await
            .unwrap();

        assert_eq!(f.reconciler.reconcile(&f.key).await, Action::AwaitChange);
        assert!(f.releases.latest(&f.key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_waits_are_capped() {
        let f = fixture(ReconcilerConfig {
            max_requeue: Duration::from_secs(3),
            ..Default::default()
        });
        f.desired
            .put(ServiceSpec::new(f.key.clone(), "api:v3", 2))
            .await
            .unwrap();

        f.reconciler.reconcile(&f.key).await;
        // Build not ready: the 10s poll interval is capped
        assert_eq!(
            f.reconciler.reconcile(&f.key).await,
            Action::Requeue(Duration::from_secs(3))
        );
    }

    #[tokio::test]
    async fn test_transient_failure_backs_off_and_notes() {
        let f = fixture(ReconcilerConfig::default());
        f.desired
            .put(ServiceSpec::new(f.key.clone(), "api:v2", 2))
            .await
            .unwrap();
        f.reconciler.reconcile(&f.key).await;
        f.reconciler.reconcile(&f.key).await;

        f.cluster
            .fail_mutations(Some(ClusterError::Unavailable("api timeout".into())));
        let action = f.reconciler.reconcile(&f.key).await;

        assert!(matches!(action, Action::Requeue(d) if d <= Duration::from_secs(5)));
        assert_eq!(f.reconciler.failures(&f.key), 1);
        let release = f.releases.active(&f.key).await.unwrap().unwrap();
        assert!(release.has_note(ReleaseNoteKind::TransientInfra));

        // Repeated identical failures do not pile up notes
        f.reconciler.reconcile(&f.key).await;
        let release = f.releases.active(&f.key).await.unwrap().unwrap();
        assert_eq!(
            release
                .notes
                .iter()
                .filter(|n| n.kind == ReleaseNoteKind::TransientInfra)
                .count(),
            1
        );
        assert_eq!(f.reconciler.failures(&f.key), 2);

        f.cluster.fail_mutations(None);
        f.reconciler.reconcile(&f.key).await;
        assert_eq!(f.reconciler.failures(&f.key), 0);
    }

    #[tokio::test]
    async fn test_abort_command_rolls_back() {
        let f = fixture(ReconcilerConfig::default());
        f.desired
            .put(ServiceSpec::new(f.key.clone(), "api:v2", 2))
            .await
            .unwrap();
        f.reconciler.reconcile(&f.key).await;

        f.mailbox.post(
            &f.key,
            OperatorCommand::Abort {
                reason: "operator".into(),
            },
        );
        f.reconciler.reconcile(&f.key).await;

        let release = f.releases.latest(&f.key).await.unwrap().unwrap();
        assert_eq!(release.outcome, Some(ReleaseOutcome::RolledBack));
        assert!(release.has_note(ReleaseNoteKind::Aborted));
        let observed = f.cluster.observe(&f.key).await.unwrap();
        assert_eq!(observed.stable_version(), Some(&ArtifactRef::new("api:v1")));

        // The rolled back generation is not retried
        assert_eq!(f.reconciler.reconcile(&f.key).await, Action::AwaitChange);
    }
}
