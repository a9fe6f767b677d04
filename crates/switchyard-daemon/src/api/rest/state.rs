//! Application state for API handlers

use crate::event_log::EventLog;
use std::sync::Arc;
use switchyard_cluster::InMemoryArtifactRegistry;
use switchyard_control::ControlPlane;
use switchyard_health::InMemorySignalSource;
use switchyard_types::Clock;
use tokio::sync::watch;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Admission, operator control, status and the work queue
    pub plane: Arc<ControlPlane>,

    /// Build pipeline registry fed by artifact events
    pub artifacts: Arc<InMemoryArtifactRegistry>,

    /// Signal source fed by sample ingestion
    pub signals: Arc<InMemorySignalSource>,

    /// Recent control plane events
    pub event_log: Arc<EventLog>,

    pub clock: Arc<dyn Clock>,

    /// Daemon version
    pub version: String,

    /// Daemon start time
    pub started_at: chrono::DateTime<chrono::Utc>,

    /// Graceful shutdown signal sender
    pub shutdown_tx: watch::Sender<bool>,
}

impl AppState {
    /// Create new application state
    pub fn new(
        plane: Arc<ControlPlane>,
        artifacts: Arc<InMemoryArtifactRegistry>,
        signals: Arc<InMemorySignalSource>,
        event_log: Arc<EventLog>,
        clock: Arc<dyn Clock>,
        shutdown_tx: watch::Sender<bool>,
    ) -> Self {
        Self {
            plane,
            artifacts,
            signals,
            event_log,
            started_at: clock.now(),
            clock,
            version: env!("CARGO_PKG_VERSION").to_string(),
            shutdown_tx,
        }
    }

    /// Get uptime as a human-readable string
    pub fn uptime(&self) -> String {
        let secs = (self.clock.now() - self.started_at).num_seconds().max(0);

        if secs < 60 {
            format!("{}s", secs)
        } else if secs < 3600 {
            format!("{}m {}s", secs / 60, secs % 60)
        } else if secs < 86400 {
            format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
        } else {
            format!("{}d {}h", secs / 86400, (secs % 86400) / 3600)
        }
    }
}
