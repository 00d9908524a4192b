// src/grpc/mod.rs
//! Control channel: tonic services and protobuf conversions
//!
//! ```text
//!   Agent ── RegisterWorker / ReportStatus ──▶ FleetManager (control plane)
//!   Agent ◀──────────── Render ─────────────── Dispatcher  (control plane)
//! ```

pub mod agent_service;
pub mod convert;
pub mod manager_service;

/// Generated protobuf types and tonic stubs for `renderfleet.v1`
pub mod proto {
    #![allow(missing_docs, clippy::all)]
    tonic::include_proto!("renderfleet.v1");
}

pub use agent_service::AgentService;
pub use manager_service::ManagerService;

use crate::utils::errors::Result;
use tonic::transport::{Channel, Endpoint};

/// Build a tonic endpoint, adding an `http://` scheme when absent
pub fn endpoint(address: &str) -> Result<Endpoint> {
    let uri = if address.contains("://") {
        address.to_string()
    } else {
        format!("http://{}", address)
    };
    Ok(Endpoint::from_shared(uri)?)
}

/// Lazily connected channel; the first RPC establishes the connection
pub fn lazy_channel(host: &str, port: u16) -> Result<Channel> {
    Ok(endpoint(&format!("{}:{}", host, port))?.connect_lazy())
}
