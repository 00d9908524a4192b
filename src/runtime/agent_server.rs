// src/runtime/agent_server.rs
//! Agent process wiring
//!
//! ```text
//! warm-up renderer ─▶ serve RenderAgent on :port ─▶ RegisterWorker ─▶ reporter
//!                                                                        │
//!           SIGTERM / SIGINT ─▶ reject new jobs ─▶ drain (grace) ─▶ close engine
//! ```
//!
//! The port is bound before registration: an agent that cannot listen exits
//! without ever announcing itself, and the control plane can dispatch as soon
//! as the first health report marks the agent HEALTHY.

use crate::grpc::endpoint;
use crate::grpc::proto::{fleet_manager_client::FleetManagerClient, WorkerRegistration};
use crate::grpc::AgentService;
use crate::model::AgentId;
use crate::runtime::agent_runtime::AgentRuntime;
use crate::runtime::http_renderer::HttpRendererLauncher;
use crate::runtime::reporter::HealthReporter;
use crate::utils::config::FleetConfig;
use crate::utils::errors::{FleetError, Result};
use crate::utils::signal::shutdown_signal;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::{Channel, Server};
use tracing::{error, info, warn};

const CONNECT_ATTEMPTS: u32 = 10;
const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(500);

pub struct AgentServer {
    agent_id: AgentId,
    port: u16,
    manager_address: String,
    config: FleetConfig,
    runtime: Arc<AgentRuntime>,
}

impl AgentServer {
    pub fn new(agent_id: AgentId, port: u16, manager_address: String, config: FleetConfig) -> Self {
        let launcher = Arc::new(HttpRendererLauncher::new(&config.renderer));
        let runtime = Arc::new(AgentRuntime::new(config.renderer.clone(), launcher));
        Self {
            agent_id,
            port,
            manager_address,
            config,
            runtime,
        }
    }

    /// Run until a shutdown signal, then drain and stop
    pub async fn run(self) -> Result<()> {
        let agent_id = self.agent_id;
        let runtime = Arc::clone(&self.runtime);
        let drain_grace = self.config.agent.drain_grace();

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            error!(%agent_id, %addr, error = %e, "Failed to bind agent port");
            FleetError::RuntimeError(format!("failed to bind {}: {}", addr, e))
        })?;

        if let Err(e) = runtime.initialize_renderer().await {
            warn!(%agent_id, error = %e, "Renderer warm-up failed, retrying on first job");
        }

        let service = AgentService::new(Arc::clone(&runtime)).into_server();
        let token = runtime.shutdown_token();
        let mut server = tokio::spawn(async move {
            Server::builder()
                .add_service(service)
                .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
                    token.cancelled().await
                })
                .await
        });
        info!(%agent_id, %addr, "Agent listening");

        let client = match connect_manager(&self.manager_address, CONNECT_ATTEMPTS, CONNECT_RETRY_DELAY)
            .await
        {
            Ok(client) => client,
            Err(e) => {
                error!(%agent_id, manager = %self.manager_address, error = %e, "Manager unreachable");
                runtime.shutdown(drain_grace).await;
                server.abort();
                return Err(e);
            }
        };

        if let Err(e) = register(client.clone(), agent_id, &self.config.agent.host, self.port).await {
            error!(%agent_id, error = %e, "Registration rejected");
            runtime.shutdown(drain_grace).await;
            server.abort();
            return Err(e);
        }

        let reporter = HealthReporter::new(
            agent_id,
            self.port,
            self.config.agent.report_interval(),
            Arc::clone(&runtime),
            Arc::new(client),
        );
        let reporter_task = tokio::spawn(reporter.run(runtime.shutdown_token()));

        tokio::select! {
            _ = shutdown_signal() => {}
            res = &mut server => {
                runtime.begin_shutdown();
                runtime.close_renderer().await;
                return match res {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(e.into()),
                    Err(e) => Err(FleetError::RuntimeError(format!("agent server task failed: {}", e))),
                };
            }
        }

        info!(%agent_id, active_jobs = runtime.active_jobs(), "Agent shutting down");
        runtime.begin_shutdown();
        match tokio::time::timeout(drain_grace, &mut server).await {
            Ok(Ok(Err(e))) => warn!(%agent_id, error = %e, "Agent server stopped with error"),
            Ok(_) => {}
            Err(_) => {
                warn!(%agent_id, "Drain grace elapsed, dropping in-flight jobs");
                server.abort();
            }
        }
        runtime.close_renderer().await;
        let _ = reporter_task.await;

        info!(%agent_id, "Agent stopped");
        Ok(())
    }
}

/// Connect to the control plane, retrying while it comes up
pub async fn connect_manager(
    address: &str,
    attempts: u32,
    delay: Duration,
) -> Result<FleetManagerClient<Channel>> {
    let endpoint = endpoint(address)?;
    let attempts = attempts.max(1);

    let mut attempt = 1;
    loop {
        match endpoint.connect().await {
            Ok(channel) => return Ok(FleetManagerClient::new(channel)),
            Err(e) if attempt < attempts => {
                warn!(address, attempt, error = %e, "Manager connection failed, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Announce this agent; a refusal is an error
pub async fn register(
    mut client: FleetManagerClient<Channel>,
    agent_id: AgentId,
    host: &str,
    port: u16,
) -> Result<()> {
    let response = client
        .register_worker(WorkerRegistration {
            agent_id: agent_id.0,
            host: host.to_string(),
            port: u32::from(port),
        })
        .await?
        .into_inner();

    if response.success {
        info!(%agent_id, message = %response.message, "Registered with manager");
        Ok(())
    } else {
        Err(FleetError::RuntimeError(format!(
            "registration refused: {}",
            response.message
        )))
    }
}
