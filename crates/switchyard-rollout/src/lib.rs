//! Switchyard Rollout - Release state machine and traffic shifting
//!
//! This crate sequences a single release from build confirmation to a
//! terminal outcome.
//!
//! ## Key Concepts
//!
//! - **ReleaseStateMachine**: Advances a release one step per call
//! - **TrafficShifter**: Monotonic, idempotent routing changes with tolerance
//! - **StepOutcome**: What the caller should do next (advance, wait, stop)
//!
//! ## Phases
//!
//! ```text
//! Pending -> Deploying -> Shifting <-> Evaluating -> Promoting -> Stable
//!                 \            \            \            \
//!                  +------------+------------+------------+-> RollingBack -> RolledBack
//! any active phase except RollingBack -> Failed
//! ```
//!
//! The machine never sleeps. Waiting for readiness, an evaluation window or
//! a build is expressed as [`StepOutcome::Wait`].

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod error;
pub mod machine;
pub mod traffic;

// Re-exports
pub use error::{Result, RolloutError};
pub use machine::{MachineConfig, MachineDeps, ReleaseStateMachine, StepOutcome};
pub use traffic::TrafficShifter;
