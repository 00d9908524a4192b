// src/runtime/reporter.rs
//! Periodic health reporting from an agent to the control plane
//!
//! Reports once right after registration, then every `report_interval`.
//! A failed send is logged and counted; the loop keeps going until the agent
//! shuts down.

use crate::grpc::proto::{self, fleet_manager_client::FleetManagerClient};
use crate::model::{AgentId, HealthStatus};
use crate::runtime::agent_runtime::AgentRuntime;
use crate::utils::errors::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use sysinfo::System;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tonic::transport::Channel;

/// Destination for status reports
#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn report(&self, report: proto::StatusReport) -> Result<()>;
}

#[async_trait]
impl StatusSink for FleetManagerClient<Channel> {
    async fn report(&self, report: proto::StatusReport) -> Result<()> {
        let mut client = self.clone();
        client.report_status(report).await?;
        Ok(())
    }
}

/// Host CPU and memory load in percent
pub struct LoadSampler {
    system: System,
}

impl LoadSampler {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }

    /// `(cpu_percent, memory_percent)`
    pub fn sample(&mut self) -> (f32, f32) {
        self.system.refresh_cpu_usage();
        self.system.refresh_memory();

        let cpu = self.system.global_cpu_usage();
        let total = self.system.total_memory();
        let memory = if total == 0 {
            0.0
        } else {
            (self.system.used_memory() as f64 / total as f64 * 100.0) as f32
        };
        (cpu, memory)
    }
}

impl Default for LoadSampler {
    fn default() -> Self {
        Self::new()
    }
}

pub struct HealthReporter {
    agent_id: AgentId,
    port: u16,
    interval: Duration,
    runtime: Arc<AgentRuntime>,
    sink: Arc<dyn StatusSink>,
    sampler: LoadSampler,
}

impl HealthReporter {
    pub fn new(
        agent_id: AgentId,
        port: u16,
        interval: Duration,
        runtime: Arc<AgentRuntime>,
        sink: Arc<dyn StatusSink>,
    ) -> Self {
        Self {
            agent_id,
            port,
            interval,
            runtime,
            sink,
            sampler: LoadSampler::new(),
        }
    }

    fn build_report(&mut self) -> proto::StatusReport {
        let (cpu_usage, memory_usage) = self.sampler.sample();
        let status = if self.runtime.is_healthy() {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        };

        proto::StatusReport {
            agent_id: self.agent_id.0,
            port: u32::from(self.port),
            status: proto::HealthCheckStatus::from(status) as i32,
            active_jobs: self.runtime.active_jobs() as u32,
            cpu_usage,
            memory_usage,
        }
    }

    /// Report until `shutdown` is cancelled
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(agent_id = %self.agent_id, interval_ms = self.interval.as_millis() as u64, "Starting health reporting");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let report = self.build_report();
            let status = report.status;
            match self.sink.report(report).await {
                Ok(()) => debug!(agent_id = %self.agent_id, status, "Status reported"),
                Err(e) => {
                    metrics::counter!("agent_reports_failed_total").increment(1);
                    warn!(agent_id = %self.agent_id, error = %e, "Status report failed");
                }
            }
        }

        debug!(agent_id = %self.agent_id, "Health reporting stopped");
    }
}
