//! Server setup and lifecycle management

use crate::api::create_router;
use crate::api::rest::state::AppState;
use crate::config::DaemonConfig;
use crate::error::{DaemonError, DaemonResult};
use crate::event_log::EventLog;
use axum::Router;
use std::sync::Arc;
use switchyard_cluster::{InMemoryArtifactRegistry, InMemoryCluster};
use switchyard_control::{
    ControlPlane, ControlPlaneDeps, InMemoryDesiredStateStore, InMemoryReleaseStore,
};
use switchyard_health::InMemorySignalSource;
use switchyard_types::{Clock, SystemClock};
use tokio::net::TcpListener;
use tokio::sync::watch;

/// Switchyard daemon server
pub struct Server {
    config: DaemonConfig,
    state: AppState,
    shutdown_rx: watch::Receiver<bool>,
}

impl Server {
    /// Create a new server with the given configuration
    pub fn new(config: DaemonConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a server whose control plane reads time from `clock`
    pub fn with_clock(config: DaemonConfig, clock: Arc<dyn Clock>) -> Self {
        let cluster = Arc::new(InMemoryCluster::new(clock.clone()));
        let artifacts = Arc::new(InMemoryArtifactRegistry::new());
        let signals = Arc::new(InMemorySignalSource::with_retention(
            config.signal_retention(),
        ));

        let plane = Arc::new(ControlPlane::new(
            ControlPlaneDeps {
                desired: Arc::new(InMemoryDesiredStateStore::new()),
                releases: Arc::new(InMemoryReleaseStore::new()),
                cluster,
                artifacts: artifacts.clone(),
                signals: signals.clone(),
                clock: clock.clone(),
            },
            config.plane_config(),
        ));

        let event_log = Arc::new(EventLog::new(config.server.event_log_capacity));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let state = AppState::new(plane, artifacts, signals, event_log, clock, shutdown_tx);

        Self {
            config,
            state,
            shutdown_rx,
        }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Router serving this server's state
    pub fn router(&self) -> Router {
        create_router(self.state.clone(), self.config.server.enable_cors)
    }

    /// Run the server until a shutdown signal arrives
    pub async fn run(self) -> DaemonResult<()> {
        let addr = self.config.server.listen_addr;
        let app = self.router();

        // Create listener
        let listener = TcpListener::bind(addr).await?;

        tracing::info!("Switchyard daemon listening on {}", addr);
        tracing::info!(
            workers = self.config.reconciler.workers,
            supersede = ?self.config.reconciler.supersede,
            "Control plane configured"
        );

        // Background tasks: event log and reconcile controller
        let event_log = tokio::spawn(
            self.state
                .event_log
                .clone()
                .run(self.state.plane.subscribe(), self.shutdown_rx.clone()),
        );
        let controller = tokio::spawn(
            self.state
                .plane
                .controller
                .clone()
                .run(self.shutdown_rx.clone()),
        );

        // Run server with graceful shutdown
        let api_shutdown = self.shutdown_rx.clone();
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                tokio::select! {
                    _ = shutdown_signal() => {}
                    _ = stop_requested(api_shutdown) => {}
                }
            })
            .await
            .map_err(|e| DaemonError::Server(e.to_string()));

        tracing::info!("Switchyard daemon shutting down");

        // Stop background tasks even when serving failed
        self.state.shutdown_tx.send_replace(true);
        if let Err(e) = controller.await {
            tracing::error!(error = %e, "Controller task failed");
        }
        if let Err(e) = event_log.await {
            tracing::error!(error = %e, "Event log task failed");
        }

        served
    }
}

/// Resolves once `true` is sent on the daemon's shutdown channel
async fn stop_requested(mut shutdown: watch::Receiver<bool>) {
    loop {
        let stop = *shutdown.borrow_and_update();
        if stop || shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
