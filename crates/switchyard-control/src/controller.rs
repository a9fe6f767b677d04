//! Controller: worker pool, resync ticker and observer wiring
//!
//! Keys reach the queue from admission, operators, observer change
//! notifications and the periodic resync. Workers pull one key at a time,
//! run a reconcile pass and requeue according to the returned [`Action`].

use crate::queue::WorkQueue;
use crate::reconciler::{Action, Reconciler};
use crate::store::DesiredStateStore;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use switchyard_cluster::ClusterObserver;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Number of concurrent reconcile workers
    pub workers: usize,

    /// Interval at which every known service is re-enqueued
    pub resync_interval: Duration,

    /// Interval at which the observer polls the cluster
    pub observe_interval: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            resync_interval: Duration::from_secs(60),
            observe_interval: Duration::from_secs(10),
        }
    }
}

/// Runs the reconciliation loop until shutdown
pub struct Controller {
    queue: Arc<WorkQueue>,
    reconciler: Arc<Reconciler>,
    observer: Arc<ClusterObserver>,
    desired: Arc<dyn DesiredStateStore>,
    config: ControllerConfig,
}

impl Controller {
    pub fn new(
        queue: Arc<WorkQueue>,
        reconciler: Arc<Reconciler>,
        observer: Arc<ClusterObserver>,
        desired: Arc<dyn DesiredStateStore>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            queue,
            reconciler,
            observer,
            desired,
            config,
        }
    }

    /// Start workers and background tasks; returns once shutdown completes
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) {
        info!(
            workers = self.config.workers,
            resync_secs = self.config.resync_interval.as_secs(),
            "Controller started"
        );

        let mut tasks: Vec<JoinHandle<()>> = (0..self.config.workers.max(1))
            .map(|id| tokio::spawn(self.clone().worker(id)))
            .collect();
        tasks.push(tokio::spawn(self.clone().resync(shutdown.clone())));
        tasks.push(tokio::spawn(self.clone().forward_changes(shutdown.clone())));
        tasks.push(tokio::spawn(
            self.observer
                .clone()
                .run(self.config.observe_interval, shutdown.clone()),
        ));

        let mut shutdown = shutdown;
        while !*shutdown.borrow() {
            if shutdown.changed().await.is_err() {
                break;
            }
        }

        info!("Controller shutting down");
        self.queue.shutdown();

        for result in join_all(tasks).await {
            if let Err(e) = result {
                error!(error = %e, "Controller task panicked");
            }
        }
        info!("Controller stopped");
    }

    async fn worker(self: Arc<Self>, id: usize) {
        debug!(worker = id, "Worker started");

        while let Some(key) = self.queue.next().await {
            let action = self.reconciler.reconcile(&key).await;
            self.queue.done(&key);

            match action {
                Action::Requeue(delay) => self.queue.add_after(key, delay),
                Action::AwaitChange => {}
            }
        }

        debug!(worker = id, "Worker stopped");
    }

    /// Enqueue every known service
    pub async fn resync_once(&self) -> usize {
        match self.desired.list_keys().await {
            Ok(keys) => {
                let count = keys.len();
                for key in keys {
                    self.queue.add(key);
                }
                count
            }
            Err(e) => {
                error!(error = %e, "Resync failed to list services");
                0
            }
        }
    }

    async fn resync(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.resync_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let count = self.resync_once().await;
                    debug!(services = count, "Resync");
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    async fn forward_changes(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut changes = self.observer.subscribe();

        loop {
            tokio::select! {
                change = changes.recv() => match change {
                    Ok(key) => self.queue.add(key),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "Observer notifications lagged, resyncing");
                        self.resync_once().await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }
}
