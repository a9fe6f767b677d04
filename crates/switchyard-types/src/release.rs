//! Release types
//!
//! A Release is one attempt to converge a ServiceSpec's version onto the
//! cluster. Its history is append-only and it is immutable once terminal.

use crate::{
    ArtifactRef, HealthVerdict, ReleaseId, ServiceKey, ServiceSpec, TrafficSplit, Variant,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Release lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleasePhase {
    /// Waiting for the build pipeline to confirm the artifact
    Pending,
    /// New workload being created at 0% traffic
    Deploying,
    /// Applying the next traffic step
    Shifting,
    /// Holding a traffic step while health samples accumulate
    Evaluating,
    /// Moving the new version into the stable slot
    Promoting,
    /// Terminal success
    Stable,
    /// Returning traffic to the stable version
    RollingBack,
    /// Terminal, previous version restored
    RolledBack,
    /// Terminal, unrecoverable
    Failed,
}

impl ReleasePhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReleasePhase::Stable | ReleasePhase::RolledBack | ReleasePhase::Failed
        )
    }

    /// Outcome recorded when a release enters this phase
    pub fn outcome(&self) -> Option<ReleaseOutcome> {
        match self {
            ReleasePhase::Stable => Some(ReleaseOutcome::Stable),
            ReleasePhase::RolledBack => Some(ReleaseOutcome::RolledBack),
            ReleasePhase::Failed => Some(ReleaseOutcome::Failed),
            _ => None,
        }
    }

    /// Whether `next` is a permitted successor.
    ///
    /// The forward path is Pending, Deploying, Shifting/Evaluating (looping
    /// per step), Promoting, Stable. Any non-terminal phase may divert into
    /// RollingBack, and every phase except RollingBack may fail.
    pub fn can_transition_to(&self, next: ReleasePhase) -> bool {
        use ReleasePhase::*;

        match (self, next) {
            (Stable | RolledBack | Failed, _) => false,
            (RollingBack, RolledBack) => true,
            (RollingBack, _) => false,
            (_, RollingBack | Failed) => true,
            (Pending, Deploying) => true,
            (Deploying, Shifting | Promoting) => true,
            (Shifting, Evaluating | Promoting) => true,
            (Evaluating, Shifting | Promoting) => true,
            (Promoting, Stable) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ReleasePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReleasePhase::Pending => "pending",
            ReleasePhase::Deploying => "deploying",
            ReleasePhase::Shifting => "shifting",
            ReleasePhase::Evaluating => "evaluating",
            ReleasePhase::Promoting => "promoting",
            ReleasePhase::Stable => "stable",
            ReleasePhase::RollingBack => "rolling_back",
            ReleasePhase::RolledBack => "rolled_back",
            ReleasePhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Terminal outcome of a release
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseOutcome {
    Stable,
    RolledBack,
    Failed,
}

/// A recorded phase change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub from: ReleasePhase,
    pub to: ReleasePhase,
    pub at: DateTime<Utc>,
    pub reason: String,
}

/// A recorded health evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerdictRecord {
    pub at: DateTime<Utc>,
    pub step: usize,
    pub canary_percent: u8,
    pub verdict: HealthVerdict,
}

/// Category of a release note
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseNoteKind {
    /// Cluster or observer hiccup, retried
    TransientInfra,
    /// Spec or artifact problem
    SpecInvalid,
    /// Canary failed health evaluation
    HealthDegraded,
    /// No progress within the release timeout
    ConvergenceTimeout,
    /// Cleanup after rollback did not fully succeed
    RollbackFailure,
    /// Orchestrator refused a mutation
    ClusterRejected,
    /// Operator abort honoured
    Aborted,
    /// Replaced by a newer desired state
    Superseded,
}

/// An error or operational event attached to a release
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseNote {
    pub at: DateTime<Utc>,
    pub kind: ReleaseNoteKind,
    pub message: String,
}

/// Rejected phase change
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("invalid phase transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: ReleasePhase,
    pub to: ReleasePhase,
}

/// One attempt to converge a spec onto the cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Release {
    pub id: ReleaseId,

    /// Snapshot of the spec being converged
    pub spec: ServiceSpec,

    /// Version in the stable slot when the release started
    pub previous_version: Option<ArtifactRef>,

    pub phase: ReleasePhase,

    /// Traffic split last applied by this release
    pub traffic: TrafficSplit,

    /// Index into the strategy schedule
    pub step_index: usize,

    /// Schedule step whose split is currently routed
    #[serde(default)]
    pub applied_step: Option<usize>,

    pub created_at: DateTime<Utc>,
    pub phase_entered_at: DateTime<Utc>,
    pub last_progress_at: DateTime<Utc>,
    /// When the current traffic split was applied
    pub traffic_changed_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,

    pub transitions: Vec<PhaseTransition>,
    pub verdicts: Vec<VerdictRecord>,

    /// Canary percentages applied, in order
    pub traffic_history: Vec<u8>,

    pub notes: Vec<ReleaseNote>,

    /// Cleanup attempts made while rolling back
    pub rollback_attempts: u32,

    /// Bumped on every write; stores use it for compare-and-swap
    pub generation: u64,

    pub outcome: Option<ReleaseOutcome>,
}

impl Release {
    pub fn new(
        id: ReleaseId,
        spec: ServiceSpec,
        previous_version: Option<ArtifactRef>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            spec,
            previous_version,
            phase: ReleasePhase::Pending,
            traffic: TrafficSplit::ALL_STABLE,
            step_index: 0,
            applied_step: None,
            created_at: now,
            phase_entered_at: now,
            last_progress_at: now,
            traffic_changed_at: now,
            finished_at: None,
            transitions: Vec::new(),
            verdicts: Vec::new(),
            traffic_history: Vec::new(),
            notes: Vec::new(),
            rollback_attempts: 0,
            generation: 0,
            outcome: None,
        }
    }

    pub fn key(&self) -> &ServiceKey {
        &self.spec.key
    }

    pub fn target_version(&self) -> &ArtifactRef {
        &self.spec.version
    }

    pub fn is_active(&self) -> bool {
        !self.phase.is_terminal()
    }

    /// Whether this release shifts traffic between two variants.
    ///
    /// A first deploy has no stable version to split against, so it is
    /// rolled out in place whatever the strategy.
    pub fn shifts_traffic(&self) -> bool {
        self.spec.strategy.shifts_traffic() && self.previous_version.is_some()
    }

    /// Slot the new version is deployed into
    pub fn deploy_variant(&self) -> Variant {
        if self.shifts_traffic() {
            Variant::Canary
        } else {
            Variant::Stable
        }
    }

    /// Move to `to`, recording the transition and any terminal outcome
    pub fn transition(
        &mut self,
        to: ReleasePhase,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), InvalidTransition> {
        if !self.phase.can_transition_to(to) {
            return Err(InvalidTransition {
                from: self.phase,
                to,
            });
        }

        self.transitions.push(PhaseTransition {
            from: self.phase,
            to,
            at: now,
            reason: reason.into(),
        });
        self.phase = to;
        self.phase_entered_at = now;
        self.last_progress_at = now;

        if let Some(outcome) = to.outcome() {
            self.outcome = Some(outcome);
            self.finished_at = Some(now);
        }
        self.generation += 1;
        Ok(())
    }

    pub fn record_traffic(&mut self, split: TrafficSplit, now: DateTime<Utc>) {
        self.traffic = split;
        self.traffic_history.push(split.canary_percent());
        self.traffic_changed_at = now;
        self.last_progress_at = now;
        self.generation += 1;
    }

    pub fn record_verdict(&mut self, verdict: HealthVerdict, now: DateTime<Utc>) {
        self.verdicts.push(VerdictRecord {
            at: now,
            step: self.step_index,
            canary_percent: self.traffic.canary_percent(),
            verdict,
        });
        self.generation += 1;
    }

    pub fn note(&mut self, kind: ReleaseNoteKind, message: impl Into<String>, now: DateTime<Utc>) {
        self.notes.push(ReleaseNote {
            at: now,
            kind,
            message: message.into(),
        });
        self.generation += 1;
    }

    /// Whether the current schedule step has already been routed
    pub fn step_applied(&self) -> bool {
        self.applied_step == Some(self.step_index)
    }

    /// Canary percentage of the current schedule step
    pub fn current_step_percent(&self) -> Option<u8> {
        self.spec.strategy.schedule().get(self.step_index).copied()
    }

    pub fn is_last_step(&self) -> bool {
        self.step_index + 1 >= self.spec.strategy.schedule().len()
    }

    /// Phases visited, starting with Pending
    pub fn phase_path(&self) -> Vec<ReleasePhase> {
        std::iter::once(ReleasePhase::Pending)
            .chain(self.transitions.iter().map(|t| t.to))
            .collect()
    }

    pub fn has_note(&self, kind: ReleaseNoteKind) -> bool {
        self.notes.iter().any(|n| n.kind == kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn release() -> Release {
        let spec = ServiceSpec::new(ServiceKey::new("acme", "prod", "api"), "api:v2", 2);
        Release::new(ReleaseId::new(1), spec, Some("api:v1".into()), Utc::now())
    }

    #[test]
    fn test_forward_path() {
        use ReleasePhase::*;
        let path = [Deploying, Shifting, Evaluating, Shifting, Evaluating, Promoting, Stable];

        let mut r = release();
        for phase in path {
            r.transition(phase, "step", Utc::now()).unwrap();
        }

        assert_eq!(r.outcome, Some(ReleaseOutcome::Stable));
        assert!(r.finished_at.is_some());
        assert_eq!(r.generation, path.len() as u64);
        assert_eq!(r.phase_path().len(), path.len() + 1);
    }

    #[test]
    fn test_no_regression_outside_rollback() {
        use ReleasePhase::*;
        assert!(!Shifting.can_transition_to(Deploying));
        assert!(!Promoting.can_transition_to(Shifting));
        assert!(!Evaluating.can_transition_to(Pending));
        assert!(Evaluating.can_transition_to(RollingBack));
        assert!(Pending.can_transition_to(RollingBack));
        assert!(RollingBack.can_transition_to(RolledBack));
        assert!(!RollingBack.can_transition_to(Failed));
        assert!(!RollingBack.can_transition_to(Shifting));
    }

    #[test]
    fn test_terminal_is_immutable() {
        let mut r = release();
        r.transition(ReleasePhase::Failed, "boom", Utc::now()).unwrap();

        let err = r
            .transition(ReleasePhase::RollingBack, "abort", Utc::now())
            .unwrap_err();
        assert_eq!(err.from, ReleasePhase::Failed);
        assert!(!r.is_active());
    }

    #[test]
    fn test_traffic_and_verdict_history() {
        let mut r = release();
        r.record_traffic(TrafficSplit::canary(10).unwrap(), Utc::now());
        r.record_traffic(TrafficSplit::canary(25).unwrap(), Utc::now());
        assert_eq!(r.traffic_history, vec![10, 25]);
        assert_eq!(r.current_step_percent(), Some(10));
        assert!(!r.is_last_step());
    }

    #[test]
    fn test_step_applied_follows_index() {
        let mut r = release();
        assert!(!r.step_applied());

        r.applied_step = Some(0);
        assert!(r.step_applied());

        r.step_index += 1;
        assert!(!r.step_applied());
    }

    #[test]
    fn test_first_deploy_goes_in_place() {
        let mut r = release();
        assert_eq!(r.deploy_variant(), Variant::Canary);

        r.previous_version = None;
        assert!(!r.shifts_traffic());
        assert_eq!(r.deploy_variant(), Variant::Stable);
    }
}
