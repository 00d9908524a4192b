// src/gateway/mod.rs
//! HTTP/JSON gateway
//!
//! ```text
//! POST   /agents       ─▶ Supervisor::spawn        201 {agent_id, port, message}
//! DELETE /agents/{id}  ─▶ Supervisor::kill         200 {agent_id, status} | 404
//! GET    /agents       ─▶ Registry::snapshot       200 {agents, processes}
//! POST   /render       ─▶ Dispatcher::dispatch     200 RenderResult
//! GET    /health                                   200 {status, agents}
//! ```
//!
//! Dispatch failures: no healthy agent is 503, capacity or shutdown rejection
//! is 429 with `Retry-After`, an unreachable agent is 502, a malformed body
//! is 400.

pub mod response;
pub mod server;

pub use server::Gateway;
