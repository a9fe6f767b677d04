//! HTTP API for switchyardd

pub mod rest;

pub use rest::router::create_router;
