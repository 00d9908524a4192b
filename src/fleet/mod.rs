// src/fleet/mod.rs
//! Control-plane side of the fleet
//!
//! - **Registry**: authoritative table of registered agents and their load
//! - **Dispatcher**: least-loaded selection and job forwarding
//! - **Supervisor**: agent process spawn, readiness wait and termination
//! - **Process Manager**: OS process capabilities behind traits
//!
//! # Architecture
//!
//! ```text
//!            Gateway
//!           │       │
//!     spawn/kill   render
//!           ▼       ▼
//!     Supervisor  Dispatcher
//!           │       │ select_target()
//!           ▼       ▼
//!     ┌─────────────────────┐   RegisterWorker / ReportStatus
//!     │    FleetRegistry    │◀──────────────────────────────── agents
//!     └─────────────────────┘
//! ```

pub mod dispatcher;
pub mod process_manager;
pub mod registry;
pub mod supervisor;

pub use dispatcher::{select_least_loaded, Dispatcher, LoadReport};
pub use process_manager::{CommandLauncher, LaunchSpec, ProcessHandle, ProcessLauncher};
pub use registry::{AgentClient, AgentRecord, AgentTarget, FleetRegistry};
pub use supervisor::{ProcessInfo, SpawnedAgent, Supervisor, Termination};
