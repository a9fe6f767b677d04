//! Cluster mutation interface
//!
//! Every mutation has apply semantics: re-applying the state the cluster
//! already holds is a no-op.

use crate::error::{ClusterError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicI16, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use switchyard_types::{
    ArtifactRef, Clock, ClusterObservation, ResourceLimits, ServiceKey, TrafficSplit, Variant,
    VariantStatus,
};

/// Desired state of one workload variant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadSpec {
    pub variant: Variant,
    pub version: ArtifactRef,
    pub replicas: u32,
    pub resources: ResourceLimits,
}

/// Client for the underlying container orchestrator
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Snapshot the live state of a service
    async fn observe(&self, key: &ServiceKey) -> Result<ClusterObservation>;

    /// Create or update a workload
    async fn apply_workload(&self, key: &ServiceKey, workload: &WorkloadSpec) -> Result<()>;

    /// Delete a workload, succeeding if it is already gone
    async fn delete_workload(&self, key: &ServiceKey, variant: Variant) -> Result<()>;

    /// Set the routing weights between stable and canary
    async fn apply_traffic(&self, key: &ServiceKey, split: TrafficSplit) -> Result<()>;

    /// Services with any resources in the cluster
    async fn list_services(&self) -> Result<Vec<ServiceKey>>;
}

#[derive(Debug, Clone)]
struct Workload {
    spec: WorkloadSpec,
    ready: u32,
}

#[derive(Debug, Clone, Default)]
struct ServiceResources {
    stable: Option<Workload>,
    canary: Option<Workload>,
    traffic: TrafficSplit,
}

impl ServiceResources {
    fn slot(&mut self, variant: Variant) -> &mut Option<Workload> {
        match variant {
            Variant::Stable => &mut self.stable,
            Variant::Canary => &mut self.canary,
        }
    }
}

/// In-memory orchestrator used by tests and the development daemon.
///
/// Only mutations that change state are counted, so an idempotent caller
/// leaves [`InMemoryCluster::mutation_count`] untouched.
#[derive(Debug)]
pub struct InMemoryCluster {
    services: DashMap<ServiceKey, ServiceResources>,
    clock: Arc<dyn Clock>,
    mutations: AtomicU64,
    auto_ready: AtomicBool,
    traffic_skew: AtomicI16,
    mutation_failure: Mutex<Option<ClusterError>>,
    observe_failure: Mutex<Option<ClusterError>>,
}

impl InMemoryCluster {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            services: DashMap::new(),
            clock,
            mutations: AtomicU64::new(0),
            auto_ready: AtomicBool::new(true),
            traffic_skew: AtomicI16::new(0),
            mutation_failure: Mutex::new(None),
            observe_failure: Mutex::new(None),
        }
    }

    /// Effective mutations applied so far
    pub fn mutation_count(&self) -> u64 {
        self.mutations.load(Ordering::SeqCst)
    }

    /// When set, new workloads report all replicas ready immediately
    pub fn set_auto_ready(&self, auto_ready: bool) {
        self.auto_ready.store(auto_ready, Ordering::SeqCst);
    }

    /// Set the ready replica count of an existing workload
    pub fn set_ready(&self, key: &ServiceKey, variant: Variant, ready: u32) {
        if let Some(mut resources) = self.services.get_mut(key) {
            if let Some(workload) = resources.slot(variant) {
                workload.ready = ready.min(workload.spec.replicas);
            }
        }
    }

    /// Offset between requested and enforced canary percentage
    pub fn set_traffic_skew(&self, skew: i16) {
        self.traffic_skew.store(skew, Ordering::SeqCst);
    }

    /// Make every mutating call fail with `error` until cleared
    pub fn fail_mutations(&self, error: Option<ClusterError>) {
        *self
            .mutation_failure
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = error;
    }

    /// Make `observe` fail with `error` until cleared
    pub fn fail_observations(&self, error: Option<ClusterError>) {
        *self
            .observe_failure
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = error;
    }

    /// Seed a running stable workload without counting it as a mutation
    pub fn seed_stable(&self, key: &ServiceKey, version: impl Into<ArtifactRef>, replicas: u32) {
        let mut resources = self.services.entry(key.clone()).or_default();
        resources.stable = Some(Workload {
            spec: WorkloadSpec {
                variant: Variant::Stable,
                version: version.into(),
                replicas,
                resources: ResourceLimits::default(),
            },
            ready: replicas,
        });
        resources.traffic = TrafficSplit::ALL_STABLE;
    }

    fn check_mutation(&self) -> Result<()> {
        match &*self
            .mutation_failure
            .lock()
            .unwrap_or_else(|e| e.into_inner())
        {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn record_mutation(&self) {
        self.mutations.fetch_add(1, Ordering::SeqCst);
    }

    fn enforced(&self, requested: TrafficSplit) -> Result<TrafficSplit> {
        let skew = self.traffic_skew.load(Ordering::SeqCst);
        if skew == 0 || requested.canary_percent() == 0 || requested.canary_percent() == 100 {
            return Ok(requested);
        }
        let canary = (i16::from(requested.canary_percent()) + skew).clamp(0, 100) as u8;
        Ok(TrafficSplit::canary(canary)?)
    }
}

fn status(workload: &Workload) -> VariantStatus {
    VariantStatus {
        version: workload.spec.version.clone(),
        desired_replicas: workload.spec.replicas,
        ready_replicas: workload.ready,
        total_replicas: workload.spec.replicas,
    }
}

#[async_trait]
impl ClusterClient for InMemoryCluster {
    async fn observe(&self, key: &ServiceKey) -> Result<ClusterObservation> {
        if let Some(err) = &*self
            .observe_failure
            .lock()
            .unwrap_or_else(|e| e.into_inner())
        {
            return Err(err.clone());
        }

        let now = self.clock.now();
        Ok(match self.services.get(key) {
            Some(resources) => ClusterObservation {
                key: key.clone(),
                stable: resources.stable.as_ref().map(status),
                canary: resources.canary.as_ref().map(status),
                traffic: resources.traffic,
                observed_at: now,
            },
            None => ClusterObservation::empty(key.clone(), now),
        })
    }

    async fn apply_workload(&self, key: &ServiceKey, workload: &WorkloadSpec) -> Result<()> {
        self.check_mutation()?;

        let auto_ready = self.auto_ready.load(Ordering::SeqCst);
        let mut resources = self.services.entry(key.clone()).or_default();
        let slot = resources.slot(workload.variant);

        if slot.as_ref().map(|w| &w.spec) == Some(workload) {
            return Ok(());
        }

        let ready = match slot.as_ref() {
            _ if auto_ready => workload.replicas,
            Some(existing) if existing.spec.version == workload.version => {
                existing.ready.min(workload.replicas)
            }
            _ => 0,
        };
        *slot = Some(Workload {
            spec: workload.clone(),
            ready,
        });
        drop(resources);

        tracing::debug!(
            service = %key,
            variant = ?workload.variant,
            version = %workload.version,
            replicas = workload.replicas,
            "Applied workload"
        );
        self.record_mutation();
        Ok(())
    }

    async fn delete_workload(&self, key: &ServiceKey, variant: Variant) -> Result<()> {
        self.check_mutation()?;

        let removed = match self.services.get_mut(key) {
            Some(mut resources) => resources.slot(variant).take().is_some(),
            None => false,
        };

        if removed {
            tracing::debug!(service = %key, variant = ?variant, "Deleted workload");
            self.record_mutation();
        }
        Ok(())
    }

    async fn apply_traffic(&self, key: &ServiceKey, split: TrafficSplit) -> Result<()> {
        self.check_mutation()?;

        let enforced = self.enforced(split)?;
        let mut resources = self.services.entry(key.clone()).or_default();

        if split.canary_percent() > 0 && resources.canary.is_none() {
            return Err(ClusterError::WorkloadMissing {
                key: key.clone(),
                variant: Variant::Canary,
            });
        }
        if split.stable_percent() > 0 && resources.stable.is_none() {
            return Err(ClusterError::WorkloadMissing {
                key: key.clone(),
                variant: Variant::Stable,
            });
        }
        if resources.traffic == enforced {
            return Ok(());
        }
        resources.traffic = enforced;
        drop(resources);

        tracing::debug!(
            service = %key,
            canary_percent = enforced.canary_percent(),
            "Applied traffic split"
        );
        self.record_mutation();
        Ok(())
    }

    async fn list_services(&self) -> Result<Vec<ServiceKey>> {
        Ok(self.services.iter().map(|e| e.key().clone()).collect())
    }
}
