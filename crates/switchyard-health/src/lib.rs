//! # Switchyard Health - Canary health evaluation
//!
//! This crate decides whether a canary version is behaving well enough to
//! receive more traffic.
//!
//! ## Key Components
//!
//! - [`evaluate`]: Pure function from (samples, thresholds) to a verdict
//! - [`SignalSource`]: Pluggable capability that supplies samples for a window
//! - [`InMemorySignalSource`]: Deterministic source for tests and development
//!
//! The evaluator holds no state. Whether to wait, retry or roll back after
//! a verdict is the caller's decision.
//!
//! ## Example
//!
//! ```rust
//! use chrono::Utc;
//! use switchyard_health::evaluate;
//! use switchyard_types::{HealthCheckConfig, Sample};
//!
//! let thresholds = HealthCheckConfig::default().thresholds();
//! let samples: Vec<Sample> = (0..60).map(|_| Sample::ok(Utc::now(), 40)).collect();
//!
//! assert!(evaluate(&samples, &thresholds).is_healthy());
//! ```

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod error;
pub mod evaluator;
pub mod source;

pub use error::{HealthError, Result};
pub use evaluator::{evaluate, percentile, window_metrics};
pub use source::{InMemorySignalSource, SignalSource, DEFAULT_RETENTION};
