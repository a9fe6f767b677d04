//! Switchyard Daemon library
//!
//! This module provides the core components of `switchyardd`:
//! - REST API handlers over the control plane
//! - Layered configuration
//! - Recent event log
//! - Server lifecycle management

#![deny(unsafe_code)]

pub mod api;
pub mod config;
pub mod error;
pub mod event_log;
pub mod server;

pub use api::create_router;
pub use api::rest::state::AppState;
pub use config::DaemonConfig;
pub use error::{ApiError, ApiResult, DaemonError, DaemonResult};
pub use event_log::EventLog;
pub use server::Server;
