//! Release status read model

use crate::error::{ControlError, Result};
use crate::store::{DesiredStateStore, ReleaseStore};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use switchyard_cluster::ClusterObserver;
use switchyard_types::{
    ArtifactRef, ClusterObservation, Release, ReleaseId, ReleaseNote, ReleaseOutcome,
    ReleasePhase, ServiceKey, TrafficSplit, VerdictRecord,
};

/// Summary of one release
#[derive(Debug, Clone, Serialize)]
pub struct ReleaseStatus {
    pub id: ReleaseId,
    pub version: ArtifactRef,
    pub previous_version: Option<ArtifactRef>,
    pub strategy: &'static str,
    pub phase: ReleasePhase,
    pub outcome: Option<ReleaseOutcome>,
    pub traffic: TrafficSplit,
    pub step_index: usize,
    pub traffic_history: Vec<u8>,
    pub verdicts: Vec<VerdictRecord>,
    pub notes: Vec<ReleaseNote>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<&Release> for ReleaseStatus {
    fn from(release: &Release) -> Self {
        Self {
            id: release.id,
            version: release.target_version().clone(),
            previous_version: release.previous_version.clone(),
            strategy: release.spec.strategy.name(),
            phase: release.phase,
            outcome: release.outcome,
            traffic: release.traffic,
            step_index: release.step_index,
            traffic_history: release.traffic_history.clone(),
            verdicts: release.verdicts.clone(),
            notes: release.notes.clone(),
            created_at: release.created_at,
            finished_at: release.finished_at,
        }
    }
}

/// Everything known about one service
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub key: ServiceKey,
    pub desired_version: Option<ArtifactRef>,
    pub desired_generation: Option<u64>,
    /// The in-flight release, or the most recent one when none is in flight
    pub release: Option<ReleaseStatus>,
    pub observed: Option<ClusterObservation>,
}

/// Read-only view over the stores and the observer cache
pub struct StatusReader {
    desired: Arc<dyn DesiredStateStore>,
    releases: Arc<dyn ReleaseStore>,
    observer: Arc<ClusterObserver>,
}

impl StatusReader {
    pub fn new(
        desired: Arc<dyn DesiredStateStore>,
        releases: Arc<dyn ReleaseStore>,
        observer: Arc<ClusterObserver>,
    ) -> Self {
        Self {
            desired,
            releases,
            observer,
        }
    }

    pub async fn service(&self, key: &ServiceKey) -> Result<ServiceStatus> {
        let spec = self.desired.get(key).await?;
        let release = self.releases.latest(key).await?;

        if spec.is_none() && release.is_none() {
            return Err(ControlError::service_not_found(key));
        }

        Ok(ServiceStatus {
            key: key.clone(),
            desired_version: spec.as_ref().map(|s| s.version.clone()),
            desired_generation: spec.as_ref().map(|s| s.generation),
            release: release.as_ref().map(ReleaseStatus::from),
            observed: self.observer.latest(key),
        })
    }

    /// Release history, newest first
    pub async fn releases(&self, key: &ServiceKey) -> Result<Vec<ReleaseStatus>> {
        let history = self.releases.history(key).await?;
        Ok(history.iter().rev().map(ReleaseStatus::from).collect())
    }

    pub async fn release(&self, key: &ServiceKey, id: ReleaseId) -> Result<Release> {
        self.releases
            .get(key, id)
            .await?
            .ok_or_else(|| ControlError::release_not_found(key, id))
    }

    pub async fn services(&self) -> Result<Vec<ServiceKey>> {
        Ok(self.desired.list_keys().await?)
    }
}
