//! Service specification types
//!
//! A ServiceSpec is the desired state for one service. It is replaced
//! wholesale on every deploy request; there are no partial updates.

use crate::{ArtifactRef, HealthThresholds, ServiceKey};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Desired state for a single service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSpec {
    /// Service identity
    pub key: ServiceKey,

    /// Build artifact to run
    pub version: ArtifactRef,

    /// Desired replica count
    pub replicas: u32,

    /// Per-replica resource limits
    #[serde(default)]
    pub resources: ResourceLimits,

    /// How the new version is rolled out
    #[serde(default)]
    pub strategy: RolloutStrategy,

    /// Health evaluation configuration
    #[serde(default)]
    pub health: HealthCheckConfig,

    /// Per-service generation, stamped by the desired-state store
    #[serde(default)]
    pub generation: u64,

    /// When the store accepted this spec
    #[serde(default)]
    pub submitted_at: Option<DateTime<Utc>>,
}

impl ServiceSpec {
    /// Create a spec with default strategy, limits and health configuration
    pub fn new(key: ServiceKey, version: impl Into<ArtifactRef>, replicas: u32) -> Self {
        Self {
            key,
            version: version.into(),
            replicas,
            resources: ResourceLimits::default(),
            strategy: RolloutStrategy::default(),
            health: HealthCheckConfig::default(),
            generation: 0,
            submitted_at: None,
        }
    }

    pub fn with_strategy(mut self, strategy: RolloutStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_health(mut self, health: HealthCheckConfig) -> Self {
        self.health = health;
        self
    }

    /// Ready replicas a freshly deployed workload must report
    pub fn required_ready_replicas(&self) -> u32 {
        self.health
            .min_ready_replicas
            .unwrap_or(self.replicas)
            .min(self.replicas)
    }

    /// Structural validation. Artifact existence is checked at admission.
    pub fn validate(&self) -> Result<(), SpecValidationError> {
        for (field, value) in [
            ("project", &self.key.project),
            ("environment", &self.key.environment),
            ("service", &self.key.service),
        ] {
            if value.trim().is_empty() {
                return Err(SpecValidationError::EmptyIdentity(field));
            }
        }

        if self.version.is_empty() {
            return Err(SpecValidationError::EmptyVersion);
        }

        if self.replicas == 0 {
            return Err(SpecValidationError::ZeroReplicas);
        }

        if let Some(min_ready) = self.health.min_ready_replicas {
            if min_ready == 0 || min_ready > self.replicas {
                return Err(SpecValidationError::MinReadyOutOfRange {
                    min_ready,
                    replicas: self.replicas,
                });
            }
        }

        self.strategy.validate()?;
        self.health.validate()
    }
}

/// Resource limits applied to each replica
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// CPU limit in millicores
    pub cpu_millicores: u32,

    /// Memory limit in MiB
    pub memory_mib: u32,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            cpu_millicores: 500,
            memory_mib: 512,
        }
    }
}

/// Rollout strategy, consumed by one shared release state machine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RolloutStrategy {
    /// Incremental traffic shift through the listed canary percentages
    Canary {
        /// Canary percentages, strictly increasing, ending at 100
        steps: Vec<u8>,
    },

    /// Single cutover from 0% to 100%
    BlueGreen,

    /// Replace the stable workload in place, no traffic shifting
    Recreate,
}

impl Default for RolloutStrategy {
    fn default() -> Self {
        RolloutStrategy::Canary {
            steps: vec![10, 25, 50, 100],
        }
    }
}

impl RolloutStrategy {
    /// Canary percentages applied in order. Empty for recreate.
    pub fn schedule(&self) -> Vec<u8> {
        match self {
            RolloutStrategy::Canary { steps } => steps.clone(),
            RolloutStrategy::BlueGreen => vec![100],
            RolloutStrategy::Recreate => Vec::new(),
        }
    }

    /// Whether releases using this strategy pass through Shifting/Evaluating
    pub fn shifts_traffic(&self) -> bool {
        !matches!(self, RolloutStrategy::Recreate)
    }

    pub fn name(&self) -> &'static str {
        match self {
            RolloutStrategy::Canary { .. } => "canary",
            RolloutStrategy::BlueGreen => "blue-green",
            RolloutStrategy::Recreate => "recreate",
        }
    }

    fn validate(&self) -> Result<(), SpecValidationError> {
        let RolloutStrategy::Canary { steps } = self else {
            return Ok(());
        };

        let Some(&last) = steps.last() else {
            return Err(SpecValidationError::EmptySchedule);
        };

        let mut previous = 0u8;
        for &step in steps {
            if step == 0 || step > 100 {
                return Err(SpecValidationError::StepOutOfRange(step));
            }
            if step <= previous {
                return Err(SpecValidationError::NonIncreasingSchedule);
            }
            previous = step;
        }

        if last != 100 {
            return Err(SpecValidationError::FinalStepNotFull(last));
        }
        Ok(())
    }
}

/// Health-check configuration for a service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Maximum tolerated error rate (0.0 to 1.0)
    pub max_error_rate: f64,

    /// Maximum tolerated latency at `latency_percentile`, in milliseconds
    pub max_latency_ms: u64,

    /// Latency percentile compared against `max_latency_ms` (0.0 to 1.0)
    pub latency_percentile: f64,

    /// How long each traffic step is held before evaluation
    #[serde(with = "duration_serde")]
    pub evaluation_window: Duration,

    /// Minimum samples required before a verdict other than insufficient data
    pub min_samples: u32,

    /// Ready replicas required before traffic is shifted (defaults to all)
    pub min_ready_replicas: Option<u32>,

    /// Bounded wait for the new workload to become ready
    #[serde(with = "duration_serde")]
    pub readiness_timeout: Duration,

    /// How long a step may keep reporting insufficient data
    #[serde(with = "duration_serde")]
    pub max_insufficient_wait: Duration,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            max_error_rate: 0.01,
            max_latency_ms: 500,
            latency_percentile: 0.95,
            evaluation_window: Duration::from_secs(60),
            min_samples: 50,
            min_ready_replicas: None,
            readiness_timeout: Duration::from_secs(300),
            max_insufficient_wait: Duration::from_secs(600),
        }
    }
}

impl HealthCheckConfig {
    /// Thresholds handed to the health evaluator
    pub fn thresholds(&self) -> HealthThresholds {
        HealthThresholds {
            max_error_rate: self.max_error_rate,
            max_latency_ms: self.max_latency_ms,
            latency_percentile: self.latency_percentile,
            min_samples: self.min_samples,
        }
    }

    fn validate(&self) -> Result<(), SpecValidationError> {
        if !(0.0..=1.0).contains(&self.max_error_rate) {
            return Err(SpecValidationError::InvalidErrorRate(self.max_error_rate));
        }
        if !(self.latency_percentile > 0.0 && self.latency_percentile <= 1.0) {
            return Err(SpecValidationError::InvalidPercentile(
                self.latency_percentile,
            ));
        }
        if self.evaluation_window.is_zero() {
            return Err(SpecValidationError::ZeroDuration("evaluation_window"));
        }
        if self.readiness_timeout.is_zero() {
            return Err(SpecValidationError::ZeroDuration("readiness_timeout"));
        }
        Ok(())
    }
}

/// Structural problems with a submitted spec
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SpecValidationError {
    #[error("{0} must not be empty")]
    EmptyIdentity(&'static str),

    #[error("version reference must not be empty")]
    EmptyVersion,

    #[error("replica count must be at least 1")]
    ZeroReplicas,

    #[error("min_ready_replicas {min_ready} must be between 1 and replicas ({replicas})")]
    MinReadyOutOfRange { min_ready: u32, replicas: u32 },

    #[error("canary schedule must not be empty")]
    EmptySchedule,

    #[error("canary step {0}% is outside 1..=100")]
    StepOutOfRange(u8),

    #[error("canary steps must be strictly increasing")]
    NonIncreasingSchedule,

    #[error("canary schedule must end at 100%, ends at {0}%")]
    FinalStepNotFull(u8),

    #[error("max_error_rate {0} must be within 0.0..=1.0")]
    InvalidErrorRate(f64),

    #[error("latency_percentile {0} must be within (0.0, 1.0]")]
    InvalidPercentile(f64),

    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
}

/// Serde helper for Duration
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
