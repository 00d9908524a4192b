// src/fleet/dispatcher.rs
//! Least-loaded agent selection and job forwarding
//!
//! Selection is a pure function over a registry snapshot:
//!
//! ```text
//! records ──▶ filter(HEALTHY) ──▶ min by (active_jobs, cpu_load, agent_id) ──▶ target
//! ```
//!
//! Two concurrent dispatches may both pick the same agent before either
//! report lands. Balancing is approximate.

use crate::fleet::registry::FleetRegistry;
use crate::grpc::proto;
use crate::model::{AgentId, HealthStatus, Job, RenderResult};
use crate::utils::errors::{FleetError, Result};
use std::cmp::Ordering;
use std::sync::Arc;
use tonic::Code;
use tracing::{debug, info, warn};

/// Load figures the selection orders by
pub trait LoadReport {
    fn agent_id(&self) -> AgentId;
    fn health_status(&self) -> HealthStatus;
    fn active_jobs(&self) -> u32;
    fn cpu_load(&self) -> f32;
}

impl LoadReport for crate::model::AgentSnapshot {
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

fn load_order<T: LoadReport>(a: &T, b: &T) -> Ordering {
    a.active_jobs()
        .cmp(&b.active_jobs())
        .then_with(|| a.cpu_load().total_cmp(&b.cpu_load()))
        .then_with(|| a.agent_id().cmp(&b.agent_id()))
}

/// Pick the HEALTHY record with the smallest `(active_jobs, cpu_load)` pair
///
/// Full ties go to the lower agent id so the choice does not depend on map
/// iteration order.
pub fn select_least_loaded<'a, T, I>(records: I) -> Option<&'a T>
where
    T: LoadReport + 'a,
    I: IntoIterator<Item = &'a T>,
{
    records
        .into_iter()
        .filter(|r| r.health_status() == HealthStatus::Healthy)
        .min_by(|a, b| load_order(*a, *b))
}

/// Routes jobs to the least-loaded healthy agent
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<FleetRegistry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<FleetRegistry>) -> Self {
        Self { registry }
    }

    /// Select a target and forward the job over its control channel
    pub async fn dispatch(&self, job: Job) -> Result<(AgentId, RenderResult)> {
        let target = match self.registry.select_target().await {
            Ok(target) => target,
            Err(e) => {
                metrics::counter!("fleet_jobs_dispatched_total", "outcome" => "no_agent").increment(1);
                return Err(e);
            }
        };
        let agent_id = target.agent_id;
        let mut client = target.client;

        debug!(%agent_id, url = %job.url, "Dispatching render job");

        match client.render(proto::RenderRequest::from(job)).await {
            Ok(response) => {
                let result = RenderResult::from(response.into_inner());
                metrics::counter!("fleet_jobs_dispatched_total", "outcome" => "completed").increment(1);
                info!(%agent_id, status = result.status, "Render job completed");
                Ok((agent_id, result))
            }
            Err(status) => {
                metrics::counter!("fleet_jobs_dispatched_total", "outcome" => "rejected").increment(1);
                warn!(%agent_id, code = ?status.code(), "Agent rejected render job: {}", status.message());
                Err(map_rejection(status))
            }
        }
    }
}

/// Translate an agent-side gRPC status into the fleet error taxonomy
pub fn map_rejection(status: tonic::Status) -> FleetError {
    match status.code() {
        Code::ResourceExhausted => FleetError::CapacityExceeded(status.message().to_string()),
        Code::Aborted => FleetError::ShuttingDown,
        _ => FleetError::Rpc(status),
    }
}
