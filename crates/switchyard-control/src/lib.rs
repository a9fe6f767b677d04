//! Switchyard Control - Reconciliation loop and control plane APIs
//!
//! This crate turns desired states into releases and drives them to a
//! terminal outcome.
//!
//! ## Key Concepts
//!
//! - **Admission**: Validates a desired state and records it with a new generation
//! - **Reconciler**: One idempotent pass per service key, returning an [`Action`]
//! - **WorkQueue**: Service-keyed queue, one in-flight pass per key
//! - **Controller**: Worker pool, periodic resync and observer wiring
//! - **OperatorControl**: Abort and rollback through a command mailbox
//! - **StatusReader**: Release status and history
//!
//! ## Example
//!
//! ```rust,ignore
//! let plane = ControlPlane::new(deps, ControlPlaneConfig::default());
//! plane.admission.submit(spec).await?;
//!
//! let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! tokio::spawn(plane.controller.clone().run(shutdown_rx));
//! ```

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod admission;
pub mod backoff;
pub mod controller;
pub mod error;
pub mod operator;
pub mod plane;
pub mod queue;
pub mod reconciler;
pub mod status;
pub mod store;

// Re-exports
pub use admission::Admission;
pub use backoff::Backoff;
pub use controller::{Controller, ControllerConfig};
pub use error::{AdmissionError, ControlError, ReconcileError, Result, StoreError, StoreResult};
pub use operator::{CommandMailbox, OperatorCommand, OperatorControl, RollbackOutcome};
pub use plane::{ControlPlane, ControlPlaneConfig, ControlPlaneDeps};
pub use queue::{QueueStats, WorkQueue};
pub use reconciler::{Action, Reconciler, ReconcilerConfig, ReconcilerDeps, SupersedePolicy};
pub use status::{ReleaseStatus, ServiceStatus, StatusReader};
pub use store::{DesiredStateStore, InMemoryDesiredStateStore, InMemoryReleaseStore, ReleaseStore};
