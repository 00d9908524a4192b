// src/lib.rs
//! Renderfleet: a control plane for a fleet of page-rendering agents
//!
//! The control plane spawns agent processes, tracks their self-reported
//! health, and routes render jobs to the least-loaded healthy agent. Each
//! agent drives a renderer engine and returns a result envelope per job.
//!
//! # Architecture
//!
//! - **fleet**: registry, process supervisor, dispatcher (control plane)
//! - **runtime**: renderer lifecycle, job execution, health reporting (agent)
//! - **grpc**: control channel services and protobuf conversions
//! - **gateway**: HTTP/JSON front door
//! - **observability**: tracing and Prometheus setup
//! - **utils**: configuration, errors, signals
//!
//! ```text
//!  client ──HTTP──▶ Gateway ──▶ Dispatcher ──Render──▶ agent-N (RenderAgent)
//!                      │                                  │
//!                      ▼                        RegisterWorker / ReportStatus
//!                  Supervisor ──spawn/kill──▶ process     ▼
//!                      └──────────────▶ FleetRegistry ◀── FleetManager
//! ```

pub mod fleet;
pub mod gateway;
pub mod grpc;
pub mod model;
pub mod observability;
pub mod runtime;
pub mod utils;

// Re-export commonly used types
pub use fleet::{Dispatcher, FleetRegistry, Supervisor};
pub use model::{AgentId, HealthStatus, Job, RenderResult};
pub use runtime::{AgentRuntime, AgentServer};
pub use utils::config::FleetConfig;
pub use utils::errors::{FleetError, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
