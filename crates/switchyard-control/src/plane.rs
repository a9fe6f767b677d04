//! Control plane assembly
//!
//! Wires stores, the cluster boundary, the state machine and the
//! reconciliation loop into one value that the daemon and tests share.

use crate::admission::Admission;
use crate::controller::{Controller, ControllerConfig};
use crate::operator::{CommandMailbox, OperatorControl};
use crate::queue::WorkQueue;
use crate::reconciler::{Reconciler, ReconcilerConfig, ReconcilerDeps};
use crate::status::StatusReader;
use crate::store::{DesiredStateStore, ReleaseStore};
use std::sync::Arc;
use switchyard_cluster::{ArtifactRegistry, ClusterClient, ClusterObserver};
use switchyard_health::SignalSource;
use switchyard_rollout::{MachineConfig, MachineDeps, ReleaseStateMachine};
use switchyard_types::{Clock, EventEnvelope};
use tokio::sync::broadcast;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// External collaborators of the control plane
pub struct ControlPlaneDeps {
    pub desired: Arc<dyn DesiredStateStore>,
    pub releases: Arc<dyn ReleaseStore>,
    pub cluster: Arc<dyn ClusterClient>,
    pub artifacts: Arc<dyn ArtifactRegistry>,
    pub signals: Arc<dyn SignalSource>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Debug, Clone, Default)]
pub struct ControlPlaneConfig {
    pub reconciler: ReconcilerConfig,
    pub machine: MachineConfig,
    pub controller: ControllerConfig,
}

/// Every control plane component, sharing one queue and event channel
pub struct ControlPlane {
    pub queue: Arc<WorkQueue>,
    pub observer: Arc<ClusterObserver>,
    pub reconciler: Arc<Reconciler>,
    pub admission: Arc<Admission>,
    pub operator: Arc<OperatorControl>,
    pub status: Arc<StatusReader>,
    pub controller: Arc<Controller>,
    events: broadcast::Sender<EventEnvelope>,
}

impl ControlPlane {
    pub fn new(deps: ControlPlaneDeps, config: ControlPlaneConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let queue = Arc::new(WorkQueue::new());
        let mailbox = Arc::new(CommandMailbox::new());
        let observer = Arc::new(ClusterObserver::new(deps.cluster.clone()));

        let machine = ReleaseStateMachine::new(
            MachineDeps {
                cluster: deps.cluster,
                artifacts: deps.artifacts.clone(),
                signals: deps.signals,
                clock: deps.clock.clone(),
                events: events.clone(),
            },
            config.machine,
        );

        let reconciler = Arc::new(Reconciler::new(
            ReconcilerDeps {
                desired: deps.desired.clone(),
                releases: deps.releases.clone(),
                observer: observer.clone(),
                mailbox: mailbox.clone(),
                clock: deps.clock.clone(),
                events: events.clone(),
            },
            machine,
            config.reconciler,
        ));

        let admission = Arc::new(Admission::new(
            deps.desired.clone(),
            deps.artifacts,
            queue.clone(),
            deps.clock,
            events.clone(),
        ));

        let operator = Arc::new(OperatorControl::new(
            deps.releases.clone(),
            admission.clone(),
            mailbox,
            queue.clone(),
            events.clone(),
        ));

        let status = Arc::new(StatusReader::new(
            deps.desired.clone(),
            deps.releases,
            observer.clone(),
        ));

        let controller = Arc::new(Controller::new(
            queue.clone(),
            reconciler.clone(),
            observer.clone(),
            deps.desired,
            config.controller,
        ));

        Self {
            queue,
            observer,
            reconciler,
            admission,
            operator,
            status,
            controller,
            events,
        }
    }

    /// Subscribe to control plane events
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.events.subscribe()
    }

    pub fn events(&self) -> broadcast::Sender<EventEnvelope> {
        self.events.clone()
    }
}
