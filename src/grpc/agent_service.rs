// src/grpc/agent_service.rs
//! Agent side of the control channel: accepts jobs from the dispatcher
//!
//! Job failures travel in-band in the response. Capacity and shutdown
//! rejections become `RESOURCE_EXHAUSTED` and `ABORTED` so the dispatcher can
//! tell them apart from finished jobs.

use crate::grpc::proto::{self, render_agent_server::RenderAgent, RenderRequest, RenderResponse};
use crate::model::{Job, RenderResult, RENDER_FAILURE_STATUS};
use crate::runtime::agent_runtime::AgentRuntime;
use crate::utils::errors::FleetError;
use std::sync::Arc;
use tonic::{Request, Response, Status};
use tracing::{debug, warn};

pub struct AgentService {
    runtime: Arc<AgentRuntime>,
}

impl AgentService {
    pub fn new(runtime: Arc<AgentRuntime>) -> Self {
        Self { runtime }
    }

    pub fn into_server(self) -> proto::render_agent_server::RenderAgentServer<Self> {
        proto::render_agent_server::RenderAgentServer::new(self)
    }
}

#[tonic::async_trait]
impl RenderAgent for AgentService {
    async fn render(
        &self,
        request: Request<RenderRequest>,
    ) -> Result<Response<RenderResponse>, Status> {
        let job = match Job::try_from(request.into_inner()) {
            Ok(job) => job,
            Err(e) => {
                warn!(error = %e, "Malformed render request");
                let result = RenderResult::failure(RENDER_FAILURE_STATUS, e.to_string());
                return Ok(Response::new(result.into()));
            }
        };

        debug!(url = %job.url, "Render request received");
        match self.runtime.render(job).await {
            Ok(result) => Ok(Response::new(result.into())),
            Err(FleetError::CapacityExceeded(msg)) => Err(Status::resource_exhausted(msg)),
            Err(FleetError::ShuttingDown) => Err(Status::aborted("agent is shutting down")),
            Err(e) => Err(Status::internal(e.to_string())),
        }
    }
}
