//! Health signal sourcing
//!
//! The evaluator never talks to a metrics backend directly. Anything able
//! to return the canary's samples for a window can act as a source.

use crate::error::{HealthError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Mutex;
use std::time::Duration;
use switchyard_types::clock::elapsed;
use switchyard_types::{ArtifactRef, Sample, SampleWindow, ServiceKey};

/// How long samples are kept by default, matching the longest default hold
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(600);

/// Capability that supplies samples for a version over a window
#[async_trait]
pub trait SignalSource: Send + Sync {
    async fn sample(
        &self,
        key: &ServiceKey,
        version: &ArtifactRef,
        window: SampleWindow,
    ) -> Result<Vec<Sample>>;
}

/// Deterministic in-memory source.
///
/// Samples older than the retention period, measured back from the newest
/// sample recorded for the same version, are dropped as new ones arrive.
#[derive(Debug)]
pub struct InMemorySignalSource {
    samples: DashMap<(ServiceKey, ArtifactRef), Vec<Sample>>,
    retention: Duration,
    failure: Mutex<Option<HealthError>>,
}

impl Default for InMemorySignalSource {
    fn default() -> Self {
        Self::with_retention(DEFAULT_RETENTION)
    }
}

impl InMemorySignalSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(retention: Duration) -> Self {
        Self {
            samples: DashMap::new(),
            retention,
            failure: Mutex::new(None),
        }
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    pub fn record(&self, key: &ServiceKey, version: &ArtifactRef, sample: Sample) {
        self.record_all(key, version, std::iter::once(sample));
    }

    pub fn record_all(
        &self,
        key: &ServiceKey,
        version: &ArtifactRef,
        samples: impl IntoIterator<Item = Sample>,
    ) {
        let mut held = self
            .samples
            .entry((key.clone(), version.clone()))
            .or_default();
        held.extend(samples);

        if let Some(newest) = held.iter().map(|s| s.at).max() {
            held.retain(|s| elapsed(s.at, newest) <= self.retention);
        }
    }

    /// Make `sample` fail until cleared
    pub fn set_failure(&self, failure: Option<HealthError>) {
        *self.failure.lock().unwrap_or_else(|e| e.into_inner()) = failure;
    }

    /// Total samples held for a version
    pub fn len(&self, key: &ServiceKey, version: &ArtifactRef) -> usize {
        self.samples
            .get(&(key.clone(), version.clone()))
            .map(|s| s.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl SignalSource for InMemorySignalSource {
    async fn sample(
        &self,
        key: &ServiceKey,
        version: &ArtifactRef,
        window: SampleWindow,
    ) -> Result<Vec<Sample>> {
        if let Some(err) = &*self.failure.lock().unwrap_or_else(|e| e.into_inner()) {
            return Err(err.clone());
        }

        Ok(self
            .samples
            .get(&(key.clone(), version.clone()))
            .map(|samples| {
                samples
                    .iter()
                    .filter(|s| window.contains(s.at))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}
