//! Traffic shifter
//!
//! Moves live traffic between the stable and canary variants. Within a
//! shifting sequence the canary share only grows; lowering it requires an
//! explicit rollback.

use crate::error::{Result, RolloutError};
use std::sync::Arc;
use switchyard_cluster::ClusterClient;
use switchyard_types::{ClusterObservation, ServiceKey, TrafficSplit};
use tracing::instrument;

/// Adjusts routing weights and verifies what the cluster enforces
pub struct TrafficShifter {
    client: Arc<dyn ClusterClient>,
    tolerance: u8,
}

impl TrafficShifter {
    pub fn new(client: Arc<dyn ClusterClient>, tolerance: u8) -> Self {
        Self { client, tolerance }
    }

    pub fn tolerance(&self) -> u8 {
        self.tolerance
    }

    /// Route `canary_percent` of traffic to the canary.
    ///
    /// Returns the split actually in effect. Re-invoking with the target
    /// already in effect leaves routing untouched.
    #[instrument(skip(self, observed), fields(service = %key))]
    pub async fn shift_to(
        &self,
        key: &ServiceKey,
        canary_percent: u8,
        observed: &ClusterObservation,
    ) -> Result<TrafficSplit> {
        let target = TrafficSplit::canary(canary_percent)?;
        let current = observed.traffic;

        if target.within(&current, self.tolerance) {
            return Ok(current);
        }

        if canary_percent < current.canary_percent() {
            return Err(RolloutError::NonMonotonic {
                current: current.canary_percent(),
                requested: canary_percent,
            });
        }

        self.apply_and_verify(key, target).await
    }

    /// Return all traffic to the stable variant
    #[instrument(skip(self, observed), fields(service = %key))]
    pub async fn rollback(
        &self,
        key: &ServiceKey,
        observed: &ClusterObservation,
    ) -> Result<TrafficSplit> {
        if observed.traffic == TrafficSplit::ALL_STABLE {
            return Ok(observed.traffic);
        }

        tracing::info!(
            from_canary_percent = observed.traffic.canary_percent(),
            "Rolling traffic back to stable"
        );
        self.apply_and_verify(key, TrafficSplit::ALL_STABLE).await
    }

    /// Route everything to the stable slot once it runs the new version
    pub async fn settle_on_stable(
        &self,
        key: &ServiceKey,
        observed: &ClusterObservation,
    ) -> Result<TrafficSplit> {
        if observed.traffic == TrafficSplit::ALL_STABLE {
            return Ok(observed.traffic);
        }
        self.apply_and_verify(key, TrafficSplit::ALL_STABLE).await
    }

    async fn apply_and_verify(
        &self,
        key: &ServiceKey,
        target: TrafficSplit,
    ) -> Result<TrafficSplit> {
        self.client.apply_traffic(key, target).await?;

        let enforced = self.client.observe(key).await?.traffic;
        // Endpoints are exact; only intermediate steps may drift
        let tolerance = match target.canary_percent() {
            0 | 100 => 0,
            _ => self.tolerance,
        };

        if !target.within(&enforced, tolerance) {
            return Err(RolloutError::OutOfTolerance {
                requested: target.canary_percent(),
                observed: enforced.canary_percent(),
                tolerance,
            });
        }

        tracing::debug!(
            requested = target.canary_percent(),
            enforced = enforced.canary_percent(),
            "Traffic split applied"
        );
        Ok(enforced)
    }
}
