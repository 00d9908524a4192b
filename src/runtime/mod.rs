// src/runtime/mod.rs
//! Agent-side runtime
//!
//! Everything that runs inside one agent process:
//!
//! - **Agent Runtime**: renderer lifecycle and the job execution protocol
//! - **Capacity**: fail-fast limit on concurrent jobs
//! - **Renderer**: engine/context traits and the `reqwest` HTTP engine
//! - **Actions**: closed table of page actions
//! - **Reporter**: periodic health reports to the control plane
//! - **Agent Server**: gRPC serving, registration and shutdown
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────── agent process ─────────────────────────┐
//! │                                                                │
//! │  RenderAgent (gRPC) ──▶ AgentRuntime ──▶ CapacityGuard         │
//! │                             │                                  │
//! │                             ▼                                  │
//! │                        RenderEngine ──▶ BrowsingContext (1/job)│
//! │                             ▲                                  │
//! │  HealthReporter ── is_connected / active_jobs ── every 10 s    │
//! │        │                                                       │
//! └────────┼───────────────────────────────────────────────────────┘
//!          ▼
//!   FleetManager.ReportStatus (control plane)
//! ```

pub mod actions;
pub mod agent_runtime;
pub mod agent_server;
pub mod capacity;
pub mod http_renderer;
pub mod renderer;
pub mod reporter;

pub use actions::PageAction;
pub use agent_runtime::{AgentRuntime, AgentState};
pub use agent_server::AgentServer;
pub use capacity::{CapacityGuard, CapacityPermit};
pub use http_renderer::HttpRendererLauncher;
pub use renderer::{BrowsingContext, ContextOptions, ProxyCredentials, RenderEngine, RendererLauncher};
pub use reporter::{HealthReporter, LoadSampler, StatusSink};
