//! Cluster observer
//!
//! Caches the latest observation per service and broadcasts the key of
//! every service whose observed state changed. The reconciliation loop
//! subscribes to these notifications and enqueues the key.

use crate::client::ClusterClient;
use crate::error::Result;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use switchyard_types::{ClusterObservation, ServiceKey};
use tokio::sync::{broadcast, watch};
use tracing::instrument;

/// Watches live cluster state
pub struct ClusterObserver {
    client: Arc<dyn ClusterClient>,
    latest: DashMap<ServiceKey, ClusterObservation>,
    change_tx: broadcast::Sender<ServiceKey>,
}

impl ClusterObserver {
    pub fn new(client: Arc<dyn ClusterClient>) -> Self {
        let (change_tx, _) = broadcast::channel(1024);
        Self {
            client,
            latest: DashMap::new(),
            change_tx,
        }
    }

    /// Subscribe to change notifications
    pub fn subscribe(&self) -> broadcast::Receiver<ServiceKey> {
        self.change_tx.subscribe()
    }

    /// Last cached observation for a service
    pub fn latest(&self, key: &ServiceKey) -> Option<ClusterObservation> {
        self.latest.get(key).map(|o| o.clone())
    }

    /// Fetch a fresh observation, notifying subscribers if it changed
    pub async fn refresh(&self, key: &ServiceKey) -> Result<ClusterObservation> {
        let observation = self.client.observe(key).await?;

        let changed = self
            .latest
            .insert(key.clone(), observation.clone())
            .map(|previous| previous.differs_from(&observation))
            .unwrap_or(true);

        if changed {
            tracing::trace!(service = %key, traffic = %observation.traffic, "Observation changed");
            // No subscribers is fine
            let _ = self.change_tx.send(key.clone());
        }

        Ok(observation)
    }

    /// Refresh every service the cluster knows about
    #[instrument(skip(self))]
    pub async fn poll_once(&self) -> Result<usize> {
        let services = self.client.list_services().await?;
        let count = services.len();

        for key in services {
            if let Err(e) = self.refresh(&key).await {
                tracing::warn!(service = %key, error = %e, "Failed to observe service");
            }
        }

        Ok(count)
    }

    /// Poll on an interval until shutdown is signalled
    pub async fn run(self: Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!(interval_secs = interval.as_secs(), "Cluster observer started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once().await {
                        tracing::error!(error = %e, "Cluster poll failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Cluster observer stopped");
    }
}
