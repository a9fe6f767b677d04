//! Configuration for switchyardd

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;
use switchyard_control::{Backoff, ControlPlaneConfig, ControllerConfig, ReconcilerConfig, SupersedePolicy};
use switchyard_rollout::MachineConfig;

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Reconciliation loop configuration
    #[serde(default)]
    pub reconciler: ReconcilerSettings,

    /// Release state machine configuration
    #[serde(default)]
    pub rollout: RolloutSettings,

    /// Health sample ingestion
    #[serde(default)]
    pub signals: SignalSettings,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address
    pub listen_addr: SocketAddr,

    /// Enable CORS
    #[serde(default = "default_true")]
    pub enable_cors: bool,

    /// Number of recent events kept for `GET /events`
    #[serde(default = "default_event_log_capacity")]
    pub event_log_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            enable_cors: true,
            event_log_capacity: default_event_log_capacity(),
        }
    }
}

/// Reconciliation loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcilerSettings {
    /// Concurrent reconcile workers
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Base delay for transient failure backoff
    #[serde(default = "default_backoff_base")]
    pub backoff_base_secs: u64,

    /// Upper bound for transient failure backoff
    #[serde(default = "default_backoff_cap")]
    pub backoff_cap_secs: u64,

    /// Upper bound for wait-driven requeues
    #[serde(default = "default_max_requeue")]
    pub max_requeue_secs: u64,

    /// Interval at which every known service is re-enqueued
    #[serde(default = "default_resync_interval")]
    pub resync_interval_secs: u64,

    /// Interval at which the cluster observer polls
    #[serde(default = "default_observe_interval")]
    pub observe_interval_secs: u64,

    /// What happens when a new desired state arrives mid-release
    #[serde(default)]
    pub supersede: SupersedePolicy,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            backoff_base_secs: default_backoff_base(),
            backoff_cap_secs: default_backoff_cap(),
            max_requeue_secs: default_max_requeue(),
            resync_interval_secs: default_resync_interval(),
            observe_interval_secs: default_observe_interval(),
            supersede: SupersedePolicy::default(),
        }
    }
}

/// Release state machine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolloutSettings {
    /// A release making no progress for this long is failed
    #[serde(default = "default_progress_timeout")]
    pub progress_timeout_secs: u64,

    #[serde(default = "default_build_poll_interval")]
    pub build_poll_interval_secs: u64,

    #[serde(default = "default_readiness_poll_interval")]
    pub readiness_poll_interval_secs: u64,

    /// Accepted drift in canary percentage when verifying a shift
    #[serde(default = "default_traffic_tolerance")]
    pub traffic_tolerance: u8,

    /// Cleanup attempts before a rollback is recorded as incomplete
    #[serde(default = "default_rollback_attempts")]
    pub rollback_attempts: u32,
}

impl Default for RolloutSettings {
    fn default() -> Self {
        Self {
            progress_timeout_secs: default_progress_timeout(),
            build_poll_interval_secs: default_build_poll_interval(),
            readiness_poll_interval_secs: default_readiness_poll_interval(),
            traffic_tolerance: default_traffic_tolerance(),
            rollback_attempts: default_rollback_attempts(),
        }
    }
}

/// Health sample ingestion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalSettings {
    /// Samples older than this, relative to the newest for a version, are
    /// dropped. Keep it above the longest evaluation hold.
    #[serde(default = "default_signal_retention")]
    pub retention_secs: u64,
}

impl Default for SignalSettings {
    fn default() -> Self {
        Self {
            retention_secs: default_signal_retention(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Default value helpers
fn default_true() -> bool {
    true
}

fn default_event_log_capacity() -> usize {
    1000
}

fn default_workers() -> usize {
    4
}

fn default_backoff_base() -> u64 {
    5
}

fn default_backoff_cap() -> u64 {
    300
}

fn default_max_requeue() -> u64 {
    30
}

fn default_resync_interval() -> u64 {
    60
}

fn default_observe_interval() -> u64 {
    10
}

fn default_progress_timeout() -> u64 {
    30 * 60
}

fn default_build_poll_interval() -> u64 {
    10
}

fn default_readiness_poll_interval() -> u64 {
    5
}

fn default_traffic_tolerance() -> u8 {
    2
}

fn default_rollback_attempts() -> u32 {
    3
}

fn default_signal_retention() -> u64 {
    switchyard_health::DEFAULT_RETENTION.as_secs()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl DaemonConfig {
    /// Load configuration from file
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        // Add default configuration
        builder = builder.add_source(config::Config::try_from(&DaemonConfig::default())?);

        // Add file configuration if provided
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        // Environment variables, e.g. SWITCHYARD_RECONCILER__WORKERS=8
        builder = builder.add_source(
            config::Environment::with_prefix("SWITCHYARD")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    pub fn signal_retention(&self) -> Duration {
        Duration::from_secs(self.signals.retention_secs.max(1))
    }

    /// Control plane settings derived from this configuration
    pub fn plane_config(&self) -> ControlPlaneConfig {
        let reconciler = &self.reconciler;
        let rollout = &self.rollout;

        ControlPlaneConfig {
            reconciler: ReconcilerConfig {
                supersede: reconciler.supersede,
                backoff: Backoff::new(
                    Duration::from_secs(reconciler.backoff_base_secs),
                    Duration::from_secs(reconciler.backoff_cap_secs),
                ),
                max_requeue: Duration::from_secs(reconciler.max_requeue_secs),
            },
            machine: MachineConfig {
                progress_timeout: Duration::from_secs(rollout.progress_timeout_secs),
                build_poll_interval: Duration::from_secs(rollout.build_poll_interval_secs),
                readiness_poll_interval: Duration::from_secs(rollout.readiness_poll_interval_secs),
                rollback_attempts: rollout.rollback_attempts,
                traffic_tolerance: rollout.traffic_tolerance,
            },
            controller: ControllerConfig {
                workers: reconciler.workers.max(1),
                resync_interval: Duration::from_secs(reconciler.resync_interval_secs.max(1)),
                observe_interval: Duration::from_secs(reconciler.observe_interval_secs.max(1)),
            },
        }
    }
}
