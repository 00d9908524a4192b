// src/utils/errors.rs
//! Error taxonomy shared by the control plane and the agent runtime
//!
//! Registry and protocol errors are translated at the supervisor, dispatcher
//! and gateway boundaries. Job-level errors never leave the agent as errors:
//! they are folded into a [`RenderResult`](crate::model::RenderResult).

use crate::model::AgentId;
use thiserror::Error;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, FleetError>;

/// Errors raised by the fleet control plane and its agents
#[derive(Debug, Error)]
pub enum FleetError {
    /// Spawned process never registered within the wait ceiling
    #[error("agent {0} failed to register within timeout")]
    RegistrationTimeout(AgentId),

    /// No process or agent record for this id
    #[error("agent {0} not found")]
    AgentNotFound(AgentId),

    /// Dispatch found no HEALTHY candidate
    #[error("no healthy agents available")]
    NoHealthyAgent,

    /// Agent is at its local job limit
    #[error("capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// Agent is draining and rejects new jobs
    #[error("agent is shutting down")]
    ShuttingDown,

    /// Navigation did not finish before the job timeout
    #[error("navigation timeout: {0}")]
    NavigationTimeout(String),

    /// Any other job-level failure inside the renderer
    #[error("render error: {0}")]
    Render(String),

    /// Proxy string is not `user:pass@host:port`
    #[error("invalid proxy format: {0}")]
    InvalidProxy(String),

    /// Action name has no handler
    #[error("unknown action: {0}")]
    UnknownAction(String),

    /// Action arguments are missing or mistyped
    #[error("invalid arguments for action {action}: {reason}")]
    InvalidAction { action: String, reason: String },

    /// Renderer engine could not be started
    #[error("renderer initialization failed: {0}")]
    RendererInit(String),

    /// Agent process could not be launched or died before registering
    #[error("process spawn failed: {0}")]
    ProcessSpawnFailed(String),

    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("rpc error: {0}")]
    Rpc(#[from] tonic::Status),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("runtime error: {0}")]
    RuntimeError(String),
}

impl FleetError {
    /// Rejections the caller may retry against the fleet later
    pub fn is_retryable(&self) -> bool {
        matches!(self, FleetError::CapacityExceeded(_) | FleetError::ShuttingDown)
    }
}

impl From<config::ConfigError> for FleetError {
    fn from(err: config::ConfigError) -> Self {
        FleetError::ConfigError(err.to_string())
    }
}
