//! Event types for Switchyard observability
//!
//! Events provide a unified stream of release lifecycle activity.

use crate::{
    ArtifactRef, HealthVerdict, ReleaseId, ReleaseOutcome, ReleasePhase, ServiceKey,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Envelope wrapping all Switchyard events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique event ID
    pub id: Uuid,

    /// Event timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,

    /// Event source
    pub source: EventSource,

    /// Event severity
    pub severity: EventSeverity,

    /// The actual event
    pub event: SwitchyardEvent,
}

/// Event sources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventSource {
    /// Desired-state admission
    Admission,
    /// Reconciliation loop
    Reconciler,
    /// Release state machine
    StateMachine,
    /// Operator commands
    Operator,
    /// Cluster observer
    Observer,
}

/// Event severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    /// Debug-level event
    Debug,
    /// Informational event
    Info,
    /// Warning event
    Warning,
    /// Error event
    Error,
    /// Critical event requiring immediate attention
    Critical,
}

/// Switchyard events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SwitchyardEvent {
    // ═══════════════════════════════════════════════════════════════════
    // DESIRED STATE EVENTS
    // ═══════════════════════════════════════════════════════════════════
    /// New desired state accepted
    SpecAccepted {
        key: ServiceKey,
        version: ArtifactRef,
        generation: u64,
    },

    // ═══════════════════════════════════════════════════════════════════
    // RELEASE EVENTS
    // ═══════════════════════════════════════════════════════════════════
    /// Release created for a spec generation
    ReleaseCreated {
        key: ServiceKey,
        release_id: ReleaseId,
        version: ArtifactRef,
        previous_version: Option<ArtifactRef>,
    },

    /// Release moved to a new phase
    PhaseChanged {
        key: ServiceKey,
        release_id: ReleaseId,
        from: ReleasePhase,
        to: ReleasePhase,
    },

    /// Canary traffic share changed
    TrafficShifted {
        key: ServiceKey,
        release_id: ReleaseId,
        canary_percent: u8,
    },

    /// Health evaluation completed for a step
    HealthEvaluated {
        key: ServiceKey,
        release_id: ReleaseId,
        canary_percent: u8,
        verdict: HealthVerdict,
    },

    /// In-flight release replaced by newer desired state
    ReleaseSuperseded {
        key: ServiceKey,
        release_id: ReleaseId,
        superseded_by: ArtifactRef,
    },

    /// Release reached a terminal phase
    ReleaseFinished {
        key: ServiceKey,
        release_id: ReleaseId,
        outcome: ReleaseOutcome,
        reason: String,
    },

    /// Rollback cleanup could not fully restore the service
    RollbackCleanupIncomplete {
        key: ServiceKey,
        release_id: ReleaseId,
        attempts: u32,
        reason: String,
    },

    // ═══════════════════════════════════════════════════════════════════
    // OPERATOR EVENTS
    // ═══════════════════════════════════════════════════════════════════
    /// Operator asked to abort the in-flight release
    AbortRequested {
        key: ServiceKey,
        release_id: ReleaseId,
    },

    /// Operator asked to restore an earlier version
    RollbackRequested {
        key: ServiceKey,
        target_version: ArtifactRef,
    },
}

impl SwitchyardEvent {
    /// Service the event concerns
    pub fn key(&self) -> &ServiceKey {
        match self {
            SwitchyardEvent::SpecAccepted { key, .. }
            | SwitchyardEvent::ReleaseCreated { key, .. }
            | SwitchyardEvent::PhaseChanged { key, .. }
            | SwitchyardEvent::TrafficShifted { key, .. }
            | SwitchyardEvent::HealthEvaluated { key, .. }
            | SwitchyardEvent::ReleaseSuperseded { key, .. }
            | SwitchyardEvent::ReleaseFinished { key, .. }
            | SwitchyardEvent::RollbackCleanupIncomplete { key, .. }
            | SwitchyardEvent::AbortRequested { key, .. }
            | SwitchyardEvent::RollbackRequested { key, .. } => key,
        }
    }
}

impl EventEnvelope {
    /// Create a new event envelope
    pub fn new(event: SwitchyardEvent, source: EventSource) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: chrono::Utc::now(),
            source,
            severity: Self::infer_severity(&event),
            event,
        }
    }

    /// Infer severity from event type
    fn infer_severity(event: &SwitchyardEvent) -> EventSeverity {
        match event {
            SwitchyardEvent::RollbackCleanupIncomplete { .. } => EventSeverity::Critical,

            SwitchyardEvent::ReleaseFinished {
                outcome: ReleaseOutcome::Failed,
                ..
            } => EventSeverity::Error,

            SwitchyardEvent::ReleaseFinished {
                outcome: ReleaseOutcome::RolledBack,
                ..
            }
            | SwitchyardEvent::AbortRequested { .. }
            | SwitchyardEvent::ReleaseSuperseded { .. } => EventSeverity::Warning,

            SwitchyardEvent::HealthEvaluated { verdict, .. } if verdict.is_degraded() => {
                EventSeverity::Warning
            }

            SwitchyardEvent::TrafficShifted { .. } | SwitchyardEvent::HealthEvaluated { .. } => {
                EventSeverity::Debug
            }

            _ => EventSeverity::Info,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_inference() {
        let key = ServiceKey::new("acme", "prod", "api");
        let finished = |outcome| SwitchyardEvent::ReleaseFinished {
            key: key.clone(),
            release_id: ReleaseId::new(1),
            outcome,
            reason: String::new(),
        };

        let env = EventEnvelope::new(finished(ReleaseOutcome::Failed), EventSource::StateMachine);
        assert_eq!(env.severity, EventSeverity::Error);

        let env = EventEnvelope::new(
            finished(ReleaseOutcome::RolledBack),
            EventSource::StateMachine,
        );
        assert_eq!(env.severity, EventSeverity::Warning);

        let env = EventEnvelope::new(
            SwitchyardEvent::RollbackCleanupIncomplete {
                key: key.clone(),
                release_id: ReleaseId::new(1),
                attempts: 3,
                reason: "cluster unavailable".into(),
            },
            EventSource::StateMachine,
        );
        assert_eq!(env.severity, EventSeverity::Critical);
        assert_eq!(env.event.key(), &key);
    }
}
