//! Health signal and verdict types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a sample came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleSource {
    /// Live request outcome
    #[default]
    Request,
    /// Synthetic probe result
    Probe,
}

/// One request outcome or probe result for the canary version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub at: DateTime<Utc>,
    pub success: bool,
    pub latency_ms: u64,
    #[serde(default)]
    pub source: SampleSource,
}

impl Sample {
    pub fn ok(at: DateTime<Utc>, latency_ms: u64) -> Self {
        Self {
            at,
            success: true,
            latency_ms,
            source: SampleSource::Request,
        }
    }

    pub fn error(at: DateTime<Utc>, latency_ms: u64) -> Self {
        Self {
            at,
            success: false,
            latency_ms,
            source: SampleSource::Request,
        }
    }
}

/// Time range samples are collected over, inclusive on both ends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl SampleWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at <= self.end
    }
}

/// Thresholds a window is judged against
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthThresholds {
    pub max_error_rate: f64,
    pub max_latency_ms: u64,
    pub latency_percentile: f64,
    pub min_samples: u32,
}

/// Aggregates computed over a sample window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowMetrics {
    pub sample_count: u32,
    pub error_count: u32,
    pub error_rate: f64,
    /// Latency at the configured percentile, absent with no samples
    pub latency_ms: Option<u64>,
}

/// A threshold the window exceeded
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ThresholdViolation {
    ErrorRate { observed: f64, max: f64 },
    Latency { observed_ms: u64, max_ms: u64, percentile: f64 },
}

impl fmt::Display for ThresholdViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThresholdViolation::ErrorRate { observed, max } => write!(
                f,
                "error rate {:.2}% exceeds {:.2}%",
                observed * 100.0,
                max * 100.0
            ),
            ThresholdViolation::Latency {
                observed_ms,
                max_ms,
                percentile,
            } => write!(
                f,
                "p{:.0} latency {}ms exceeds {}ms",
                percentile * 100.0,
                observed_ms,
                max_ms
            ),
        }
    }
}

/// Outcome of evaluating a window, with the inputs that produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum HealthVerdict {
    Healthy {
        metrics: WindowMetrics,
        thresholds: HealthThresholds,
    },
    Degraded {
        metrics: WindowMetrics,
        thresholds: HealthThresholds,
        violations: Vec<ThresholdViolation>,
    },
    InsufficientData {
        metrics: WindowMetrics,
        thresholds: HealthThresholds,
    },
}

impl HealthVerdict {
    pub fn metrics(&self) -> &WindowMetrics {
        match self {
            HealthVerdict::Healthy { metrics, .. }
            | HealthVerdict::Degraded { metrics, .. }
            | HealthVerdict::InsufficientData { metrics, .. } => metrics,
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthVerdict::Healthy { .. })
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, HealthVerdict::Degraded { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            HealthVerdict::Healthy { .. } => "healthy",
            HealthVerdict::Degraded { .. } => "degraded",
            HealthVerdict::InsufficientData { .. } => "insufficient_data",
        }
    }
}

impl fmt::Display for HealthVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = self.metrics();
        write!(
            f,
            "{} ({} samples, error rate {:.2}%)",
            self.label(),
            m.sample_count,
            m.error_rate * 100.0
        )?;
        if let HealthVerdict::Degraded { violations, .. } = self {
            for v in violations {
                write!(f, "; {v}")?;
            }
        }
        Ok(())
    }
}
