//! Switchyard Types - Core types for the release control plane
//!
//! Switchyard takes a declarative service specification and drives a
//! container cluster toward it through progressive releases.
//!
//! ## Key Concepts
//!
//! - **ServiceSpec**: Desired state for one (project, environment, service)
//! - **Release**: One attempt to converge a spec's version onto the cluster
//! - **ClusterObservation**: Snapshot of live workload and routing state
//! - **HealthVerdict**: Outcome of evaluating a canary's health signals
//! - **Events**: Unified stream of release lifecycle activity

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod clock;
pub mod events;
pub mod health;
pub mod ids;
pub mod observation;
pub mod release;
pub mod spec;
pub mod traffic;

// Re-export main types
pub use clock::{Clock, ManualClock, SystemClock};
pub use events::{EventEnvelope, EventSeverity, EventSource, SwitchyardEvent};
pub use health::{
    HealthThresholds, HealthVerdict, Sample, SampleSource, SampleWindow, ThresholdViolation,
    WindowMetrics,
};
pub use ids::{ArtifactRef, ReleaseId, ServiceKey};
pub use observation::{ClusterObservation, Variant, VariantStatus};
pub use release::{
    InvalidTransition, PhaseTransition, Release, ReleaseNote, ReleaseNoteKind, ReleaseOutcome,
    ReleasePhase, VerdictRecord,
};
pub use spec::{
    HealthCheckConfig, ResourceLimits, RolloutStrategy, ServiceSpec, SpecValidationError,
};
pub use traffic::{TrafficSplit, TrafficSplitError};
