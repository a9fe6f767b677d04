//! Switchyard Daemon - Release control plane service
//!
//! The daemon provides:
//! - REST API for desired state, release status and operator control
//! - Reconciliation workers driving releases to a terminal outcome
//! - Event log and streaming for observability

use anyhow::Context;
use clap::Parser;
use switchyard_daemon::{DaemonConfig, Server};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Switchyard Daemon CLI
#[derive(Parser)]
#[command(name = "switchyardd")]
#[command(about = "Switchyard Daemon - Release control plane", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "SWITCHYARD_CONFIG")]
    config: Option<String>,

    /// Listen address
    #[arg(short, long, env = "SWITCHYARD_LISTEN_ADDR")]
    listen: Option<String>,

    /// Log level
    #[arg(long, env = "SWITCHYARD_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "SWITCHYARD_LOG_JSON")]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = DaemonConfig::load(cli.config.as_deref())
        .context("Failed to load configuration")?;

    // Override with CLI args
    if let Some(listen) = &cli.listen {
        config.server.listen_addr = listen
            .parse()
            .with_context(|| format!("Invalid listen address: {}", listen))?;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    config.logging.json |= cli.json;

    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.level.clone().into());

    if config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        listen = %config.server.listen_addr,
        "Starting switchyardd"
    );

    // Create and run server
    let server = Server::new(config);
    server.run().await.context("Daemon exited with an error")
}
