//! Release state machine
//!
//! Advances one release by a single step per call. Every wait is returned
//! to the caller as a delay instead of being slept on, so a worker is never
//! blocked on one service.
//!
//! The same machine serves every strategy: the step schedule comes from
//! [`RolloutStrategy::schedule`](switchyard_types::RolloutStrategy::schedule).

use crate::error::{Result, RolloutError};
use crate::traffic::TrafficShifter;
use std::sync::Arc;
use std::time::Duration;
use switchyard_cluster::{ArtifactRegistry, ClusterClient, WorkloadSpec};
use switchyard_health::{evaluate, SignalSource};
use switchyard_types::clock::elapsed;
use switchyard_types::{
    Clock, ClusterObservation, EventEnvelope, EventSource, HealthVerdict, Release,
    ReleaseNoteKind, ReleaseOutcome, ReleasePhase, SampleWindow, SwitchyardEvent, TrafficSplit,
    Variant,
};
use tokio::sync::broadcast;
use tracing::{error, info, instrument, warn};

/// Tunables for the release state machine
#[derive(Debug, Clone)]
pub struct MachineConfig {
    /// A release making no progress for this long is failed
    pub progress_timeout: Duration,

    /// Delay between build pipeline polls while Pending
    pub build_poll_interval: Duration,

    /// Delay between readiness checks while Deploying or Promoting
    pub readiness_poll_interval: Duration,

    /// Cleanup attempts before a rollback is recorded as incomplete
    pub rollback_attempts: u32,

    /// Accepted drift between requested and enforced canary percentage
    pub traffic_tolerance: u8,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            progress_timeout: Duration::from_secs(30 * 60),
            build_poll_interval: Duration::from_secs(10),
            readiness_poll_interval: Duration::from_secs(5),
            rollback_attempts: 3,
            traffic_tolerance: 2,
        }
    }
}

/// Result of advancing a release by one step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Phase changed; advance again with a fresh observation
    Advanced,
    /// Nothing to do until the delay elapses or the cluster changes
    Wait(Duration),
    /// Release reached a terminal phase
    Finished(ReleaseOutcome),
}

/// Collaborators the machine drives
pub struct MachineDeps {
    pub cluster: Arc<dyn ClusterClient>,
    pub artifacts: Arc<dyn ArtifactRegistry>,
    pub signals: Arc<dyn SignalSource>,
    pub clock: Arc<dyn Clock>,
    pub events: broadcast::Sender<EventEnvelope>,
}

/// Sequences a release through build confirmation, deployment, traffic
/// shifting, health evaluation and promotion or rollback
pub struct ReleaseStateMachine {
    cluster: Arc<dyn ClusterClient>,
    artifacts: Arc<dyn ArtifactRegistry>,
    signals: Arc<dyn SignalSource>,
    clock: Arc<dyn Clock>,
    events: broadcast::Sender<EventEnvelope>,
    shifter: TrafficShifter,
    config: MachineConfig,
}

impl ReleaseStateMachine {
    pub fn new(deps: MachineDeps, config: MachineConfig) -> Self {
        let shifter = TrafficShifter::new(deps.cluster.clone(), config.traffic_tolerance);
        Self {
            cluster: deps.cluster,
            artifacts: deps.artifacts,
            signals: deps.signals,
            clock: deps.clock,
            events: deps.events,
            shifter,
            config,
        }
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    /// Advance `release` by one step against `observed`.
    ///
    /// Transient errors are returned for the caller to retry with backoff.
    /// Permanent errors fail the release and are recorded on it.
    #[instrument(
        skip_all,
        fields(service = %release.key(), release_id = %release.id, phase = %release.phase)
    )]
    pub async fn step(
        &self,
        release: &mut Release,
        observed: &ClusterObservation,
    ) -> Result<StepOutcome> {
        if let Some(outcome) = self.expire_if_stalled(release, Some(observed)).await? {
            return Ok(outcome);
        }

        let result = match release.phase {
            ReleasePhase::Pending => self.pending(release).await,
            ReleasePhase::Deploying => self.deploying(release, observed).await,
            ReleasePhase::Shifting => self.shifting(release, observed).await,
            ReleasePhase::Evaluating => self.evaluating(release).await,
            ReleasePhase::Promoting => self.promoting(release, observed).await,
            ReleasePhase::RollingBack => return self.rolling_back(release, observed).await,
            ReleasePhase::Stable | ReleasePhase::RolledBack | ReleasePhase::Failed => {
                return Ok(StepOutcome::Finished(
                    release.outcome.unwrap_or(ReleaseOutcome::Failed),
                ));
            }
        };

        match result {
            Err(e) if !e.is_transient() => {
                let kind = match &e {
                    RolloutError::Cluster(_) | RolloutError::NonMonotonic { .. } => {
                        ReleaseNoteKind::ClusterRejected
                    }
                    _ => ReleaseNoteKind::SpecInvalid,
                };
                self.fail(release, kind, e.to_string(), Some(observed)).await?;
                Ok(StepOutcome::Finished(ReleaseOutcome::Failed))
            }
            other => other,
        }
    }

    /// Fail the release if it has made no progress within the timeout.
    ///
    /// Does not apply while rolling back, which always ends in RolledBack.
    pub async fn expire_if_stalled(
        &self,
        release: &mut Release,
        observed: Option<&ClusterObservation>,
    ) -> Result<Option<StepOutcome>> {
        if !release.is_active() || release.phase == ReleasePhase::RollingBack {
            return Ok(None);
        }

        let stalled = elapsed(release.last_progress_at, self.clock.now());
        if stalled < self.config.progress_timeout {
            return Ok(None);
        }

        let message = format!(
            "no progress in {} for {}s",
            release.phase,
            stalled.as_secs()
        );
        self.fail(release, ReleaseNoteKind::ConvergenceTimeout, message, observed)
            .await?;
        Ok(Some(StepOutcome::Finished(ReleaseOutcome::Failed)))
    }

    /// Divert an active release into RollingBack.
    ///
    /// Returns false when the release is terminal or already rolling back.
    pub fn abort(&self, release: &mut Release, kind: ReleaseNoteKind, reason: &str) -> bool {
        if !release.is_active() || release.phase == ReleasePhase::RollingBack {
            return false;
        }

        let now = self.clock.now();
        release.note(kind, reason, now);
        if self.transition(release, ReleasePhase::RollingBack, reason).is_err() {
            return false;
        }
        warn!(service = %release.key(), release_id = %release.id, reason, "Release aborted");
        true
    }

    async fn pending(&self, release: &mut Release) -> Result<StepOutcome> {
        let ready = self
            .artifacts
            .is_ready(release.key(), release.target_version())
            .await?;

        if !ready {
            return Ok(StepOutcome::Wait(self.config.build_poll_interval));
        }

        self.transition(release, ReleasePhase::Deploying, "artifact ready")?;
        Ok(StepOutcome::Advanced)
    }

    async fn deploying(
        &self,
        release: &mut Release,
        observed: &ClusterObservation,
    ) -> Result<StepOutcome> {
        let variant = release.deploy_variant();
        let workload = self.workload(release, variant);
        let required = release.spec.required_ready_replicas();

        if observed.is_ready(variant, &workload.version, required) {
            let next = if release.shifts_traffic() {
                ReleasePhase::Shifting
            } else {
                ReleasePhase::Promoting
            };
            self.transition(
                release,
                next,
                &format!("{required} replicas of {} ready", workload.version),
            )?;
            return Ok(StepOutcome::Advanced);
        }

        let waited = elapsed(release.phase_entered_at, self.clock.now());
        if waited >= release.spec.health.readiness_timeout {
            let message = format!(
                "{} not ready after {}s",
                workload.version,
                waited.as_secs()
            );
            self.fail(release, ReleaseNoteKind::ConvergenceTimeout, message, Some(observed))
                .await?;
            return Ok(StepOutcome::Finished(ReleaseOutcome::Failed));
        }

        if !Self::workload_matches(observed, &workload) {
            info!(
                service = %release.key(),
                variant = ?variant,
                version = %workload.version,
                replicas = workload.replicas,
                "Deploying workload"
            );
            self.cluster.apply_workload(release.key(), &workload).await?;
        }

        Ok(StepOutcome::Wait(self.config.readiness_poll_interval))
    }

    async fn shifting(
        &self,
        release: &mut Release,
        observed: &ClusterObservation,
    ) -> Result<StepOutcome> {
        let Some(target) = release.current_step_percent() else {
            self.transition(release, ReleasePhase::Promoting, "schedule complete")?;
            return Ok(StepOutcome::Advanced);
        };

        let split = self.shifter.shift_to(release.key(), target, observed).await?;
        let now = self.clock.now();

        // Holding at an applied step must not restart its clocks
        if !release.step_applied() {
            release.record_traffic(split, now);
            release.applied_step = Some(release.step_index);
            info!(
                service = %release.key(),
                release_id = %release.id,
                canary_percent = split.canary_percent(),
                "Traffic shifted"
            );
            self.emit(
                SwitchyardEvent::TrafficShifted {
                    key: release.key().clone(),
                    release_id: release.id,
                    canary_percent: split.canary_percent(),
                },
                EventSource::StateMachine,
            );
        }

        self.transition(
            release,
            ReleasePhase::Evaluating,
            &format!("holding at {target}%"),
        )?;
        Ok(StepOutcome::Wait(release.spec.health.evaluation_window))
    }

    async fn evaluating(&self, release: &mut Release) -> Result<StepOutcome> {
        let now = self.clock.now();
        let health = &release.spec.health;

        let held = elapsed(release.phase_entered_at, now);
        if held < health.evaluation_window {
            return Ok(StepOutcome::Wait(health.evaluation_window - held));
        }

        let window = SampleWindow::new(release.traffic_changed_at, now);
        let samples = self
            .signals
            .sample(release.key(), release.target_version(), window)
            .await?;
        let verdict = evaluate(&samples, &health.thresholds());
        let at_level = elapsed(release.traffic_changed_at, now);
        let max_wait = health.max_insufficient_wait;

        info!(
            service = %release.key(),
            release_id = %release.id,
            canary_percent = release.traffic.canary_percent(),
            verdict = %verdict,
            "Health evaluated"
        );
        release.record_verdict(verdict.clone(), now);
        self.emit(
            SwitchyardEvent::HealthEvaluated {
                key: release.key().clone(),
                release_id: release.id,
                canary_percent: release.traffic.canary_percent(),
                verdict: verdict.clone(),
            },
            EventSource::StateMachine,
        );

        match verdict {
            HealthVerdict::Healthy { .. } if release.is_last_step() => {
                self.transition(release, ReleasePhase::Promoting, "final step healthy")?;
            }
            HealthVerdict::Healthy { .. } => {
                release.step_index += 1;
                self.transition(release, ReleasePhase::Shifting, "step healthy")?;
            }
            HealthVerdict::Degraded { .. } => {
                let reason = verdict.to_string();
                release.note(ReleaseNoteKind::HealthDegraded, &reason, now);
                self.transition(release, ReleasePhase::RollingBack, &reason)?;
            }
            HealthVerdict::InsufficientData { .. } if at_level >= max_wait => {
                let reason = format!(
                    "no verdict after {}s at {}%: {verdict}",
                    at_level.as_secs(),
                    release.traffic.canary_percent()
                );
                release.note(ReleaseNoteKind::HealthDegraded, &reason, now);
                self.transition(release, ReleasePhase::RollingBack, &reason)?;
            }
            HealthVerdict::InsufficientData { .. } => {
                self.transition(release, ReleasePhase::Shifting, "insufficient data, holding")?;
            }
        }

        Ok(StepOutcome::Advanced)
    }

    async fn promoting(
        &self,
        release: &mut Release,
        observed: &ClusterObservation,
    ) -> Result<StepOutcome> {
        let stable = self.workload(release, Variant::Stable);
        let required = release.spec.required_ready_replicas();

        if !Self::workload_matches(observed, &stable) {
            info!(service = %release.key(), version = %stable.version, "Promoting to stable slot");
            self.cluster.apply_workload(release.key(), &stable).await?;
            return Ok(StepOutcome::Wait(self.config.readiness_poll_interval));
        }

        if !observed.is_ready(Variant::Stable, &stable.version, required) {
            let waited = elapsed(release.phase_entered_at, self.clock.now());
            if waited >= release.spec.health.readiness_timeout {
                let reason = format!(
                    "promoted {} not ready after {}s",
                    stable.version,
                    waited.as_secs()
                );
                warn!(service = %release.key(), release_id = %release.id, %reason, "Promotion stalled");
                release.note(ReleaseNoteKind::ConvergenceTimeout, &reason, self.clock.now());
                self.transition(release, ReleasePhase::RollingBack, &reason)?;
                return Ok(StepOutcome::Advanced);
            }
            return Ok(StepOutcome::Wait(self.config.readiness_poll_interval));
        }

        self.shifter.settle_on_stable(release.key(), observed).await?;
        if observed.canary.is_some() {
            self.cluster
                .delete_workload(release.key(), Variant::Canary)
                .await?;
        }

        release.traffic = TrafficSplit::ALL_STABLE;
        self.transition(release, ReleasePhase::Stable, "promoted")?;
        Ok(StepOutcome::Finished(ReleaseOutcome::Stable))
    }

    /// Cleanup never fails the release. After the configured attempts it
    /// is recorded as incomplete and the release still ends RolledBack.
    async fn rolling_back(
        &self,
        release: &mut Release,
        observed: &ClusterObservation,
    ) -> Result<StepOutcome> {
        let now = self.clock.now();
        release.rollback_attempts += 1;
        release.generation += 1;

        match self.restore(release, observed).await {
            Ok(()) => {
                release.traffic = TrafficSplit::ALL_STABLE;
                if release.traffic_history.last().is_some_and(|&pct| pct != 0) {
                    release.record_traffic(TrafficSplit::ALL_STABLE, now);
                    self.emit(
                        SwitchyardEvent::TrafficShifted {
                            key: release.key().clone(),
                            release_id: release.id,
                            canary_percent: 0,
                        },
                        EventSource::StateMachine,
                    );
                }
                self.transition(release, ReleasePhase::RolledBack, "stable restored")?;
                Ok(StepOutcome::Finished(ReleaseOutcome::RolledBack))
            }
            Err(e)
                if e.is_transient() && release.rollback_attempts < self.config.rollback_attempts =>
            {
                warn!(
                    service = %release.key(),
                    release_id = %release.id,
                    attempt = release.rollback_attempts,
                    error = %e,
                    "Rollback cleanup failed, retrying"
                );
                Err(e)
            }
            Err(e) => {
                let reason = format!(
                    "cleanup incomplete after {} attempts: {e}",
                    release.rollback_attempts
                );
                error!(
                    service = %release.key(),
                    release_id = %release.id,
                    error = %e,
                    "Rollback cleanup incomplete"
                );
                release.note(ReleaseNoteKind::RollbackFailure, &reason, now);
                self.emit(
                    SwitchyardEvent::RollbackCleanupIncomplete {
                        key: release.key().clone(),
                        release_id: release.id,
                        attempts: release.rollback_attempts,
                        reason: e.to_string(),
                    },
                    EventSource::StateMachine,
                );
                self.transition(release, ReleasePhase::RolledBack, &reason)?;
                Ok(StepOutcome::Finished(ReleaseOutcome::RolledBack))
            }
        }
    }

    /// Put the previous version back in charge and remove the canary
    async fn restore(&self, release: &Release, observed: &ClusterObservation) -> Result<()> {
        let key = release.key();

        match &release.previous_version {
            Some(previous) => {
                let stable = WorkloadSpec {
                    variant: Variant::Stable,
                    version: previous.clone(),
                    replicas: release.spec.replicas,
                    resources: release.spec.resources,
                };
                if !Self::workload_matches(observed, &stable) {
                    self.cluster.apply_workload(key, &stable).await?;
                }
                self.shifter.rollback(key, observed).await?;
            }
            None => {
                // First deploy: nothing to restore, remove what was created
                if observed.stable_version() == Some(release.target_version()) {
                    self.cluster.delete_workload(key, Variant::Stable).await?;
                }
            }
        }

        if observed.canary.is_some() {
            self.cluster.delete_workload(key, Variant::Canary).await?;
        }
        Ok(())
    }

    /// Record a failure, then make a best-effort attempt to pull the canary.
    ///
    /// Traffic is only sent back to the stable slot while it still runs the
    /// previous version.
    async fn fail(
        &self,
        release: &mut Release,
        kind: ReleaseNoteKind,
        message: String,
        observed: Option<&ClusterObservation>,
    ) -> Result<()> {
        let now = self.clock.now();
        error!(
            service = %release.key(),
            release_id = %release.id,
            phase = %release.phase,
            reason = %message,
            "Release failed"
        );
        release.note(kind, &message, now);

        if release.shifts_traffic() {
            let observed =
                observed.filter(|o| o.stable_version() == release.previous_version.as_ref());
            if let Some(observed) = observed {
                match self.shifter.rollback(release.key(), observed).await {
                    Ok(split) => release.traffic = split,
                    Err(e) => {
                        warn!(service = %release.key(), error = %e, "Failed to reset traffic")
                    }
                }
                if observed.canary.is_some() {
                    if let Err(e) = self
                        .cluster
                        .delete_workload(release.key(), Variant::Canary)
                        .await
                    {
                        warn!(service = %release.key(), error = %e, "Failed to remove canary");
                    }
                }
            }
        }

        self.transition(release, ReleasePhase::Failed, &message)
    }

    fn workload(&self, release: &Release, variant: Variant) -> WorkloadSpec {
        WorkloadSpec {
            variant,
            version: release.target_version().clone(),
            replicas: release.spec.replicas,
            resources: release.spec.resources,
        }
    }

    fn workload_matches(observed: &ClusterObservation, workload: &WorkloadSpec) -> bool {
        observed
            .variant(workload.variant)
            .map(|s| s.version == workload.version && s.desired_replicas == workload.replicas)
            .unwrap_or(false)
    }

    fn transition(&self, release: &mut Release, to: ReleasePhase, reason: &str) -> Result<()> {
        let from = release.phase;
        release.transition(to, reason, self.clock.now())?;

        info!(
            service = %release.key(),
            release_id = %release.id,
            from = %from,
            to = %to,
            reason,
            "Release phase changed"
        );
        self.emit(
            SwitchyardEvent::PhaseChanged {
                key: release.key().clone(),
                release_id: release.id,
                from,
                to,
            },
            EventSource::StateMachine,
        );

        if let Some(outcome) = to.outcome() {
            self.emit(
                SwitchyardEvent::ReleaseFinished {
                    key: release.key().clone(),
                    release_id: release.id,
                    outcome,
                    reason: reason.to_string(),
                },
                EventSource::StateMachine,
            );
        }
        Ok(())
    }

    fn emit(&self, event: SwitchyardEvent, source: EventSource) {
        // No subscribers is fine
        let _ = self.events.send(EventEnvelope::new(event, source));
    }
}
