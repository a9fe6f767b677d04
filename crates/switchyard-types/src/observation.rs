//! Live cluster state as seen by the observer

use crate::{ArtifactRef, ServiceKey, TrafficSplit};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The two workload slots a service can run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    /// Currently serving version
    Stable,
    /// Version under evaluation
    Canary,
}

impl Variant {
    pub fn suffix(&self) -> &'static str {
        match self {
            Variant::Stable => "stable",
            Variant::Canary => "canary",
        }
    }
}

/// Replica state of one variant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantStatus {
    /// Version the workload is running
    pub version: ArtifactRef,

    /// Desired replicas on the workload
    pub desired_replicas: u32,

    /// Replicas passing readiness
    pub ready_replicas: u32,

    /// Replicas that exist, ready or not
    pub total_replicas: u32,
}

impl VariantStatus {
    pub fn is_fully_ready(&self) -> bool {
        self.ready_replicas >= self.desired_replicas
    }
}

/// Snapshot of a service's workloads and routing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterObservation {
    pub key: ServiceKey,

    /// Stable workload, absent before the first deploy
    pub stable: Option<VariantStatus>,

    /// Canary workload, present only during a release
    pub canary: Option<VariantStatus>,

    /// Traffic split as actually enforced
    pub traffic: TrafficSplit,

    pub observed_at: DateTime<Utc>,
}

impl ClusterObservation {
    /// Observation of a service with nothing deployed
    pub fn empty(key: ServiceKey, observed_at: DateTime<Utc>) -> Self {
        Self {
            key,
            stable: None,
            canary: None,
            traffic: TrafficSplit::ALL_STABLE,
            observed_at,
        }
    }

    pub fn variant(&self, variant: Variant) -> Option<&VariantStatus> {
        match variant {
            Variant::Stable => self.stable.as_ref(),
            Variant::Canary => self.canary.as_ref(),
        }
    }

    /// Version currently in the stable slot
    pub fn stable_version(&self) -> Option<&ArtifactRef> {
        self.stable.as_ref().map(|s| &s.version)
    }

    /// Whether `variant` runs `version` with at least `min_ready` ready replicas
    pub fn is_ready(&self, variant: Variant, version: &ArtifactRef, min_ready: u32) -> bool {
        self.variant(variant)
            .map(|s| &s.version == version && s.ready_replicas >= min_ready)
            .unwrap_or(false)
    }

    /// Whether the observation differs in anything but its timestamp
    pub fn differs_from(&self, other: &ClusterObservation) -> bool {
        self.stable != other.stable || self.canary != other.canary || self.traffic != other.traffic
    }
}
