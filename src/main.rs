// src/main.rs
//! Renderfleet control plane
//!
//! Serves the manager gRPC service for agents, the HTTP gateway for clients,
//! and supervises agent processes. On SIGTERM/SIGINT every agent is stopped
//! before exit.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use renderfleet::fleet::{CommandLauncher, Dispatcher, FleetRegistry, Supervisor};
use renderfleet::gateway::Gateway;
use renderfleet::grpc::ManagerService;
use renderfleet::observability::{init_metrics, init_tracing};
use renderfleet::utils::{shutdown_signal, FleetConfig};
use renderfleet::VERSION;
use std::fmt::Display;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(name = "renderfleet", version, about = "Render fleet control plane")]
struct Cli {
    /// Configuration file layered over config.yaml and the defaults
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = FleetConfig::load_from(cli.config.as_deref()).context("loading configuration")?;

    init_tracing(&config.logging)?;
    init_metrics(&config.metrics)?;
    info!("Starting renderfleet control plane v{}", VERSION);

    let registry = Arc::new(FleetRegistry::new());
    let shutdown = CancellationToken::new();

    let manager_addr = tokio::net::lookup_host(&config.server.manager_address)
        .await
        .with_context(|| format!("resolving {}", config.server.manager_address))?
        .next()
        .ok_or_else(|| anyhow!("{} resolved to no address", config.server.manager_address))?;
    info!(%manager_addr, "Starting manager service");
    let mut manager = tokio::spawn({
        let service = ManagerService::new(Arc::clone(&registry)).into_server();
        let token = shutdown.clone();
        async move {
            Server::builder()
                .add_service(service)
                .serve_with_shutdown(manager_addr, async move { token.cancelled().await })
                .await
        }
    });

    let agent_binary = config.supervisor.resolve_agent_binary()?;
    info!(agent_binary = %agent_binary.display(), "Agent executable resolved");
    let supervisor = Arc::new(Supervisor::new(
        Arc::clone(&registry),
        Arc::new(CommandLauncher::new(agent_binary)),
        config.supervisor.clone(),
        config.server.manager_address.clone(),
    ));
    let reaper = tokio::spawn(Arc::clone(&supervisor).run_reaper(shutdown.clone()));

    let gateway = Arc::new(Gateway::new(
        Arc::clone(&registry),
        Arc::clone(&supervisor),
        Dispatcher::new(Arc::clone(&registry)),
    ));
    let listener = TcpListener::bind(config.server.gateway_addr()?)
        .await
        .context("binding gateway listener")?;
    let mut gateway_task = tokio::spawn(gateway.serve(listener, shutdown.clone()));

    let outcome = tokio::select! {
        _ = shutdown_signal() => Ok(()),
        res = &mut manager => Err(exited("manager service", res)),
        res = &mut gateway_task => Err(exited("gateway", res)),
    };
    if let Err(e) = &outcome {
        error!("{:#}", e);
    }

    info!("Shutting down control plane");
    shutdown.cancel();
    supervisor.shutdown_all().await;
    reaper.await?;

    info!("Control plane stopped");
    outcome
}

fn exited<E: Display>(name: &str, res: std::result::Result<std::result::Result<(), E>, JoinError>) -> anyhow::Error {
    match res {
        Ok(Ok(())) => anyhow!("{} stopped unexpectedly", name),
        Ok(Err(e)) => anyhow!("{} failed: {}", name, e),
        Err(e) => anyhow!("{} task failed: {}", name, e),
    }
}
