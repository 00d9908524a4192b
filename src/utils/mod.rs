// src/utils/mod.rs
//! Common utilities: configuration, error types and shutdown signals

pub mod config;
pub mod errors;
pub mod signal;

pub use config::FleetConfig;
pub use errors::{FleetError, Result};
pub use signal::shutdown_signal;
