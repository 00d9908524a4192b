// src/grpc/manager_service.rs
//! Control-plane side of the control channel
//!
//! Agents register here once they are ready to accept jobs, then report
//! their health periodically. Both calls are thin shims over the registry.

use crate::fleet::registry::FleetRegistry;
use crate::grpc::proto::{
    self, fleet_manager_server::FleetManager, RegistrationResponse, StatusAck, StatusReport,
    WorkerRegistration,
};
use crate::model::{AgentId, HealthStatus};
use std::sync::Arc;
use tonic::{Request, Response, Status};
use tracing::{debug, warn};

pub struct ManagerService {
    registry: Arc<FleetRegistry>,
}

impl ManagerService {
    pub fn new(registry: Arc<FleetRegistry>) -> Self {
        Self { registry }
    }

    pub fn into_server(self) -> proto::fleet_manager_server::FleetManagerServer<Self> {
        proto::fleet_manager_server::FleetManagerServer::new(self)
    }
}

#[tonic::async_trait]
impl FleetManager for ManagerService {
    async fn register_worker(
        &self,
        request: Request<WorkerRegistration>,
    ) -> Result<Response<RegistrationResponse>, Status> {
        let registration = request.into_inner();
        let agent_id = AgentId(registration.agent_id);

        let Ok(port) = u16::try_from(registration.port) else {
            warn!(%agent_id, port = registration.port, "Rejecting registration with invalid port");
            return Ok(Response::new(RegistrationResponse {
                success: false,
                message: format!("invalid port {}", registration.port),
            }));
        };

        let response = match self.registry.register(agent_id, &registration.host, port).await {
            Ok(()) => RegistrationResponse {
                success: true,
                message: format!("{} registered", agent_id),
            },
            Err(e) => {
                warn!(%agent_id, error = %e, "Registration failed");
                RegistrationResponse {
                    success: false,
                    message: e.to_string(),
                }
            }
        };
        Ok(Response::new(response))
    }

    async fn report_status(
        &self,
        request: Request<StatusReport>,
    ) -> Result<Response<StatusAck>, Status> {
        let report = request.into_inner();
        let agent_id = AgentId(report.agent_id);
        let status = HealthStatus::from(report.status());

        let known = self
            .registry
            .report_health(
                agent_id,
                status,
                report.active_jobs,
                report.cpu_usage,
                report.memory_usage,
            )
            .await;
        if !known {
            debug!(%agent_id, "Status report dropped");
        }

        Ok(Response::new(StatusAck {
            received: true,
            message: if known {
                "status updated".to_string()
            } else {
                format!("{} is not registered", agent_id)
            },
        }))
    }
}
