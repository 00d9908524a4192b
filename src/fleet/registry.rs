// src/fleet/registry.rs
//! Fleet registry: the authoritative in-memory table of known agents
//!
//! Every read and write goes through one mutex, so no caller observes a
//! partial update. Health and load are self-reported by the agents. Nothing
//! here probes agents or evicts records by age; a record leaves the table only
//! through [`FleetRegistry::remove`].

use crate::fleet::dispatcher::{select_least_loaded, LoadReport};
use crate::grpc::lazy_channel;
use crate::grpc::proto::render_agent_client::RenderAgentClient;
use crate::model::{AgentId, AgentSnapshot, HealthStatus};
use crate::utils::errors::{FleetError, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tonic::transport::Channel;
use tracing::{debug, info};

/// Outbound job channel to one agent
pub type AgentClient = RenderAgentClient<Channel>;

/// One registered agent
#[derive(Debug)]
pub struct AgentRecord {
    pub agent_id: AgentId,
    pub host: String,
    pub port: u16,
    pub health_status: HealthStatus,
    pub registered_at: DateTime<Utc>,
    pub last_report_time: DateTime<Utc>,
    pub active_jobs: u32,
    pub cpu_load: f32,
    pub memory_load: f32,

    /// Dropping the last clone closes the channel
    client: AgentClient,
}

impl AgentRecord {
    pub fn snapshot(&self) -> AgentSnapshot {
        AgentSnapshot {
            agent_id: self.agent_id,
            host: self.host.clone(),
            port: self.port,
            health_status: self.health_status,
            registered_at: self.registered_at,
            last_report_time: self.last_report_time,
            active_jobs: self.active_jobs,
            cpu_load: self.cpu_load,
            memory_load: self.memory_load,
        }
    }
}

impl LoadReport for AgentRecord {
    fn agent_id(&self) -> AgentId {
        self.agent_id
    }

    fn health_status(&self) -> HealthStatus {
        self.health_status
    }

    fn active_jobs(&self) -> u32 {
        self.active_jobs
    }

    fn cpu_load(&self) -> f32 {
        self.cpu_load
    }
}

/// Selected dispatch target
#[derive(Debug, Clone)]
pub struct AgentTarget {
    pub agent_id: AgentId,
    pub client: AgentClient,
}

/// In-memory agent table
#[derive(Debug, Default)]
pub struct FleetRegistry {
    agents: Mutex<HashMap<AgentId, AgentRecord>>,
}

impl FleetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit an agent, replacing any previous record with the same id
    ///
    /// The record starts as `UNKNOWN` until the first health report.
    pub async fn register(&self, agent_id: AgentId, host: &str, port: u16) -> Result<()> {
        let client = RenderAgentClient::new(lazy_channel(host, port)?);
        let now = Utc::now();

        let record = AgentRecord {
            agent_id,
            host: host.to_string(),
            port,
            health_status: HealthStatus::Unknown,
            registered_at: now,
            last_report_time: now,
            active_jobs: 0,
            cpu_load: 0.0,
            memory_load: 0.0,
            client,
        };

        let mut agents = self.agents.lock().await;
        if agents.insert(agent_id, record).is_some() {
            info!(%agent_id, host, port, "Agent re-registered, previous record replaced");
        } else {
            info!(%agent_id, host, port, "Agent registered");
        }
        publish_gauges(&agents);
        Ok(())
    }

    /// Apply a health report; returns `false` when the agent is unknown
    ///
    /// Unknown ids are ignored so a late report never resurrects a removed
    /// record.
    pub async fn report_health(
        &self,
        agent_id: AgentId,
        status: HealthStatus,
        active_jobs: u32,
        cpu_load: f32,
        memory_load: f32,
    ) -> bool {
        let mut agents = self.agents.lock().await;
        let Some(record) = agents.get_mut(&agent_id) else {
            debug!(%agent_id, "Ignoring health report from unknown agent");
            return false;
        };

        record.health_status = status;
        record.active_jobs = active_jobs;
        record.cpu_load = cpu_load;
        record.memory_load = memory_load;
        record.last_report_time = Utc::now();

        debug!(%agent_id, ?status, active_jobs, cpu_load, memory_load, "Health report applied");
        publish_gauges(&agents);
        true
    }

    /// Least-loaded HEALTHY agent, read under the registry lock
    pub async fn select_target(&self) -> Result<AgentTarget> {
        let agents = self.agents.lock().await;
        let record = select_least_loaded(agents.values()).ok_or(FleetError::NoHealthyAgent)?;
        Ok(AgentTarget {
            agent_id: record.agent_id,
            client: record.client.clone(),
        })
    }

    /// Drop an agent record and its channel; returns whether one existed
    pub async fn remove(&self, agent_id: AgentId) -> bool {
        let mut agents = self.agents.lock().await;
        let removed = agents.remove(&agent_id).is_some();
        if removed {
            info!(%agent_id, "Agent removed from registry");
            publish_gauges(&agents);
        }
        removed
    }

    pub async fn contains(&self, agent_id: AgentId) -> bool {
        self.agents.lock().await.contains_key(&agent_id)
    }

    pub async fn len(&self) -> usize {
        self.agents.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.agents.lock().await.is_empty()
    }

    /// Copy of a single record
    pub async fn get(&self, agent_id: AgentId) -> Option<AgentSnapshot> {
        self.agents.lock().await.get(&agent_id).map(AgentRecord::snapshot)
    }

    /// Copies of every record, ordered by agent id
    pub async fn snapshot(&self) -> Vec<AgentSnapshot> {
        let agents = self.agents.lock().await;
        let mut list: Vec<AgentSnapshot> = agents.values().map(AgentRecord::snapshot).collect();
        list.sort_by_key(|s| s.agent_id);
        list
    }
}

fn publish_gauges(agents: &HashMap<AgentId, AgentRecord>) {
    let healthy = agents
        .values()
        .filter(|r| r.health_status == HealthStatus::Healthy)
        .count();
    metrics::gauge!("fleet_agents_registered").set(agents.len() as f64);
    metrics::gauge!("fleet_agents_healthy").set(healthy as f64);
}
