//! Health evaluator
//!
//! Computes the error rate and a nearest-rank latency percentile over a
//! window of samples and compares them with the configured thresholds.

use switchyard_types::{
    HealthThresholds, HealthVerdict, Sample, ThresholdViolation, WindowMetrics,
};

/// Judge a window of canary samples.
///
/// Returns `InsufficientData` when fewer than `min_samples` samples are
/// present, regardless of how good or bad they look.
pub fn evaluate(samples: &[Sample], thresholds: &HealthThresholds) -> HealthVerdict {
    let metrics = window_metrics(samples, thresholds.latency_percentile);

    if metrics.sample_count < thresholds.min_samples || metrics.sample_count == 0 {
        return HealthVerdict::InsufficientData {
            metrics,
            thresholds: *thresholds,
        };
    }

    let mut violations = Vec::new();

    // The error budget is exclusive: a rate equal to the maximum degrades
    if metrics.error_count > 0 && metrics.error_rate >= thresholds.max_error_rate {
        violations.push(ThresholdViolation::ErrorRate {
            observed: metrics.error_rate,
            max: thresholds.max_error_rate,
        });
    }

    if let Some(latency) = metrics.latency_ms {
        if latency > thresholds.max_latency_ms {
            violations.push(ThresholdViolation::Latency {
                observed_ms: latency,
                max_ms: thresholds.max_latency_ms,
                percentile: thresholds.latency_percentile,
            });
        }
    }

    if violations.is_empty() {
        HealthVerdict::Healthy {
            metrics,
            thresholds: *thresholds,
        }
    } else {
        HealthVerdict::Degraded {
            metrics,
            thresholds: *thresholds,
            violations,
        }
    }
}

/// Aggregate a window of samples
pub fn window_metrics(samples: &[Sample], latency_percentile: f64) -> WindowMetrics {
    let sample_count = u32::try_from(samples.len()).unwrap_or(u32::MAX);
    let error_count = u32::try_from(samples.iter().filter(|s| !s.success).count())
        .unwrap_or(u32::MAX);

    let error_rate = if sample_count == 0 {
        0.0
    } else {
        f64::from(error_count) / f64::from(sample_count)
    };

    let mut latencies: Vec<u64> = samples.iter().map(|s| s.latency_ms).collect();
    latencies.sort_unstable();

    WindowMetrics {
        sample_count,
        error_count,
        error_rate,
        latency_ms: percentile(&latencies, latency_percentile),
    }
}

/// Nearest-rank percentile of an ascending slice
pub fn percentile(sorted: &[u64], p: f64) -> Option<u64> {
    if sorted.is_empty() {
        return None;
    }
    let p = p.clamp(0.0, 1.0);
    let rank = (p * sorted.len() as f64).ceil() as usize;
    let index = rank.clamp(1, sorted.len()) - 1;
    Some(sorted[index])
}
