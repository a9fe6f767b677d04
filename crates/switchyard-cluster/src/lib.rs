//! Switchyard Cluster - Interfaces to the container orchestrator and build pipeline
//!
//! This crate provides the boundary between the release control plane and
//! the systems it drives:
//!
//! - **ClusterClient**: Apply-semantics mutation of workloads and routing
//! - **ClusterObserver**: Cached observations plus change notifications
//! - **ArtifactRegistry**: Build pipeline existence and readiness signals
//!
//! ## In-Memory vs Real Backends
//!
//! The crate ships in-memory implementations used by tests and the
//! development daemon. Adapters for a real orchestrator implement the same
//! traits.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod artifacts;
pub mod client;
pub mod error;
pub mod observer;

// Re-exports
pub use artifacts::{ArtifactRegistry, InMemoryArtifactRegistry};
pub use client::{ClusterClient, InMemoryCluster, WorkloadSpec};
pub use error::{ArtifactError, ClusterError, Result};
pub use observer::ClusterObserver;
