// src/bin/agent.rs
//! Renderfleet agent process
//!
//! Launched by the control plane with `--id N --port P --manager host:port`.
//! Serves render jobs until SIGTERM/SIGINT, then drains and exits.

use anyhow::{Context, Result};
use clap::Parser;
use renderfleet::model::AgentId;
use renderfleet::observability::{init_metrics, init_tracing};
use renderfleet::runtime::AgentServer;
use renderfleet::utils::FleetConfig;
use renderfleet::VERSION;
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "renderfleet-agent", version, about = "Render fleet agent")]
struct Cli {
    /// Agent id assigned by the control plane
    #[arg(long)]
    id: u64,

    /// Port to serve the RenderAgent service on
    #[arg(long)]
    port: u16,

    /// Control plane manager address
    #[arg(long)]
    manager: String,

    /// Configuration file layered over config.yaml and the defaults
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = FleetConfig::load_from(cli.config.as_deref()).context("loading configuration")?;
    config.metrics = config.agent.metrics_for(cli.port);

    init_tracing(&config.logging)?;
    init_metrics(&config.metrics)?;

    let agent_id = AgentId(cli.id);
    info!(%agent_id, port = cli.port, manager = %cli.manager, "Starting renderfleet agent v{}", VERSION);

    AgentServer::new(agent_id, cli.port, cli.manager, config)
        .run()
        .await
        .with_context(|| format!("{} failed", agent_id))
}
