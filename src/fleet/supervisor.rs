// src/fleet/supervisor.rs
//! Process supervisor: spawns agents, waits for registration, retires them
//!
//! # Lifecycle
//!
//! ```text
//! spawn() ─▶ allocate (id, port) ─▶ launch ─▶ ProcessRecord{registered: false}
//!                                              │
//!                    poll registry every interval, up to N attempts
//!                       │                                  │
//!                  registered                       timeout / early exit
//!                       ▼                                  ▼
//!          ProcessRecord{registered: true}     SIGTERM ─(grace)─▶ SIGKILL,
//!                                              record dropped, error returned
//! ```
//!
//! Agent ids and ports come from one monotonic counter and are never reused.

use crate::fleet::process_manager::{stop_process, LaunchSpec, ProcessHandle, ProcessLauncher};
use crate::fleet::registry::FleetRegistry;
use crate::model::AgentId;
use crate::utils::config::SupervisorConfig;
use crate::utils::errors::{FleetError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// One spawned OS process
pub struct ProcessRecord {
    pub agent_id: AgentId,
    pub port: u16,
    pub spawn_time: DateTime<Utc>,
    pub registered: bool,
    process: Box<dyn ProcessHandle>,
}

/// Read-only view of a [`ProcessRecord`]
#[derive(Debug, Clone, Serialize)]
pub struct ProcessInfo {
    pub agent_id: AgentId,
    pub port: u16,
    pub pid: Option<u32>,
    pub spawn_time: DateTime<Utc>,
    pub registered: bool,
}

/// Successful spawn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SpawnedAgent {
    pub agent_id: AgentId,
    pub port: u16,
}

/// Kill acknowledgment
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Termination {
    pub agent_id: AgentId,
    pub status: &'static str,
}

struct SupervisorState {
    processes: HashMap<AgentId, ProcessRecord>,
    next_agent_id: u64,
}

/// Owns the process table and the id/port counter
pub struct Supervisor {
    registry: Arc<FleetRegistry>,
    launcher: Arc<dyn ProcessLauncher>,
    config: SupervisorConfig,
    manager_address: String,
    state: Mutex<SupervisorState>,
}

impl Supervisor {
    pub fn new(
        registry: Arc<FleetRegistry>,
        launcher: Arc<dyn ProcessLauncher>,
        config: SupervisorConfig,
        manager_address: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            launcher,
            config,
            manager_address: manager_address.into(),
            state: Mutex::new(SupervisorState {
                processes: HashMap::new(),
                next_agent_id: 0,
            }),
        }
    }

    /// Next `(agent_id, port)` pair; the counter advances even if the launch fails
    async fn allocate(&self) -> Result<(AgentId, u16)> {
        let mut state = self.state.lock().await;
        let id = state.next_agent_id;
        state.next_agent_id += 1;

        let port = u64::from(self.config.base_port) + id;
        let port = u16::try_from(port).map_err(|_| {
            FleetError::ProcessSpawnFailed(format!("port range exhausted at agent-{}", id))
        })?;
        Ok((AgentId(id), port))
    }

    /// Launch a new agent and wait until it registers
    pub async fn spawn(&self) -> Result<SpawnedAgent> {
        let (agent_id, port) = self.allocate().await?;
        let spec = LaunchSpec {
            agent_id,
            port,
            manager_address: self.manager_address.clone(),
        };

        info!(%agent_id, port, "Spawning agent");
        let process = self.launcher.launch(&spec).await?;

        self.state.lock().await.processes.insert(
            agent_id,
            ProcessRecord {
                agent_id,
                port,
                spawn_time: Utc::now(),
                registered: false,
                process,
            },
        );
        metrics::counter!("fleet_agents_spawned_total").increment(1);

        match self.await_registration(agent_id).await {
            Ok(()) => {
                info!(%agent_id, port, "Agent is ready");
                Ok(SpawnedAgent { agent_id, port })
            }
            Err(e) => {
                warn!(%agent_id, "Agent failed to come up: {}", e);
                self.discard(agent_id).await;
                Err(e)
            }
        }
    }

    async fn await_registration(&self, agent_id: AgentId) -> Result<()> {
        let interval = self.config.registration_poll_interval();

        for attempt in 1..=self.config.registration_poll_attempts {
            tokio::time::sleep(interval).await;

            let registered = self.registry.contains(agent_id).await;
            let mut state = self.state.lock().await;
            // A concurrent kill owns the record now
            let record = state
                .processes
                .get_mut(&agent_id)
                .ok_or(FleetError::AgentNotFound(agent_id))?;

            if registered {
                record.registered = true;
                return Ok(());
            }
            if record.process.has_exited()? {
                return Err(FleetError::ProcessSpawnFailed(format!(
                    "{} exited before registering",
                    agent_id
                )));
            }
            debug!(%agent_id, attempt, "Waiting for agent registration");
        }

        Err(FleetError::RegistrationTimeout(agent_id))
    }

    /// Stop a process that never became ready and forget it
    async fn discard(&self, agent_id: AgentId) {
        let record = self.state.lock().await.processes.remove(&agent_id);
        if let Some(mut record) = record {
            if let Err(e) = stop_process(record.process.as_mut(), self.config.terminate_grace()).await {
                error!(%agent_id, "Failed to stop agent process: {}", e);
            }
        }
        // A registration may have landed after the last poll
        self.registry.remove(agent_id).await;
    }

    /// Terminate an agent and drop both its process and registry records
    pub async fn kill(&self, agent_id: AgentId) -> Result<Termination> {
        let mut record = self
            .state
            .lock()
            .await
            .processes
            .remove(&agent_id)
            .ok_or(FleetError::AgentNotFound(agent_id))?;

        info!(%agent_id, pid = ?record.process.pid(), "Terminating agent");
        match stop_process(record.process.as_mut(), self.config.terminate_grace()).await {
            Ok(true) => debug!(%agent_id, "Agent exited gracefully"),
            Ok(false) => warn!(%agent_id, "Agent was force-killed"),
            Err(e) => error!(%agent_id, "Error stopping agent process: {}", e),
        }

        self.registry.remove(agent_id).await;
        metrics::counter!("fleet_agents_killed_total").increment(1);

        Ok(Termination {
            agent_id,
            status: "terminated",
        })
    }

    /// Drop registered agents whose process has already exited
    pub async fn reap_exited(&self) -> Vec<AgentId> {
        let exited: Vec<AgentId> = {
            let mut state = self.state.lock().await;
            let ids: Vec<AgentId> = state
                .processes
                .iter_mut()
                .filter(|(_, record)| record.registered)
                .filter_map(|(id, record)| match record.process.has_exited() {
                    Ok(true) => Some(*id),
                    Ok(false) => None,
                    Err(e) => {
                        warn!(agent_id = %id, "Failed to poll agent process: {}", e);
                        None
                    }
                })
                .collect();
            for id in &ids {
                state.processes.remove(id);
            }
            ids
        };

        for agent_id in &exited {
            warn!(%agent_id, "Agent process exited on its own, removing it");
            self.registry.remove(*agent_id).await;
        }
        exited
    }

    /// Periodically reap exited agents until `shutdown` fires
    pub async fn run_reaper(self: Arc<Self>, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.reap_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    self.reap_exited().await;
                }
            }
        }
        debug!("Reaper stopped");
    }

    /// Kill every known agent; failures are logged, not returned
    pub async fn shutdown_all(&self) {
        let ids: Vec<AgentId> = self.state.lock().await.processes.keys().copied().collect();
        info!("Shutting down {} agents", ids.len());

        for agent_id in ids {
            if let Err(e) = self.kill(agent_id).await {
                error!(%agent_id, "Error shutting down agent: {}", e);
            }
        }
    }

    pub async fn contains(&self, agent_id: AgentId) -> bool {
        self.state.lock().await.processes.contains_key(&agent_id)
    }

    /// Process table, ordered by agent id
    pub async fn processes(&self) -> Vec<ProcessInfo> {
        let state = self.state.lock().await;
        let mut list: Vec<ProcessInfo> = state
            .processes
            .values()
            .map(|r| ProcessInfo {
                agent_id: r.agent_id,
                port: r.port,
                pid: r.process.pid(),
                spawn_time: r.spawn_time,
                registered: r.registered,
            })
            .collect();
        list.sort_by_key(|p| p.agent_id);
        list
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory process fakes shared by supervisor and gateway tests

    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    /// Observable state of one fake process
    #[derive(Debug, Clone, Default)]
    pub struct FakeFlags {
        pub exited: Arc<AtomicBool>,
        pub terminated: Arc<AtomicBool>,
        pub killed: Arc<AtomicBool>,
    }

    struct FakeProcess {
        flags: FakeFlags,
        ignore_sigterm: bool,
    }

    #[async_trait]
    impl ProcessHandle for FakeProcess {
        fn pid(&self) -> Option<u32> {
            if self.flags.exited.load(Ordering::SeqCst) {
                None
            } else {
                Some(4242)
            }
        }

        async fn terminate(&mut self) -> Result<()> {
            self.flags.terminated.store(true, Ordering::SeqCst);
            if !self.ignore_sigterm {
                self.flags.exited.store(true, Ordering::SeqCst);
            }
            Ok(())
        }

        async fn kill(&mut self) -> Result<()> {
            self.flags.killed.store(true, Ordering::SeqCst);
            self.flags.exited.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn wait_timeout(&mut self, timeout: Duration) -> Result<bool> {
            if !self.flags.exited.load(Ordering::SeqCst) {
                tokio::time::sleep(timeout).await;
            }
            Ok(self.flags.exited.load(Ordering::SeqCst))
        }

        fn has_exited(&mut self) -> Result<bool> {
            Ok(self.flags.exited.load(Ordering::SeqCst))
        }
    }

    /// How a launched fake agent behaves
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum FakeBehavior {
        /// Registers with the registry shortly after launch
        Registers,
        /// Stays alive but never registers
        Silent,
        /// Never registers and ignores SIGTERM
        Stubborn,
        /// Exits immediately
        Crashes,
    }

    pub struct FakeLauncher {
        registry: Arc<FleetRegistry>,
        behavior: FakeBehavior,
        pub launched: parking_lot::Mutex<Vec<(LaunchSpec, FakeFlags)>>,
    }

    impl FakeLauncher {
        pub fn new(registry: Arc<FleetRegistry>, behavior: FakeBehavior) -> Self {
            Self {
                registry,
                behavior,
                launched: parking_lot::Mutex::new(Vec::new()),
            }
        }

        pub fn flags(&self, index: usize) -> FakeFlags {
            self.launched.lock()[index].1.clone()
        }
    }

    #[async_trait]
    impl ProcessLauncher for FakeLauncher {
        async fn launch(&self, spec: &LaunchSpec) -> Result<Box<dyn ProcessHandle>> {
            let flags = FakeFlags::default();
            self.launched.lock().push((spec.clone(), flags.clone()));

            match self.behavior {
                FakeBehavior::Registers => {
                    let registry = Arc::clone(&self.registry);
                    let (agent_id, port) = (spec.agent_id, spec.port);
                    tokio::spawn(async move {
                        tokio::time::sleep(Duration::from_millis(1500)).await;
                        registry.register(agent_id, "localhost", port).await.unwrap();
                    });
                }
                FakeBehavior::Crashes => flags.exited.store(true, Ordering::SeqCst),
                FakeBehavior::Silent | FakeBehavior::Stubborn => {}
            }

            Ok(Box::new(FakeProcess {
                flags,
                ignore_sigterm: self.behavior == FakeBehavior::Stubborn,
            }))
        }
    }

    pub fn supervisor_with(behavior: FakeBehavior) -> (Arc<Supervisor>, Arc<FakeLauncher>, Arc<FleetRegistry>) {
        let registry = Arc::new(FleetRegistry::new());
        let launcher = Arc::new(FakeLauncher::new(Arc::clone(&registry), behavior));
        let supervisor = Arc::new(Supervisor::new(
            Arc::clone(&registry),
            launcher.clone(),
            SupervisorConfig::default(),
            "localhost:50050",
        ));
        (supervisor, launcher, registry)
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use std::sync::atomic::Ordering;

    #[tokio::test(start_paused = true)]
    async fn test_spawn_then_kill_round_trip() {
        let (supervisor, launcher, registry) = supervisor_with(FakeBehavior::Registers);

        let spawned = supervisor.spawn().await.unwrap();
        assert_eq!(spawned, SpawnedAgent { agent_id: AgentId(0), port: 50051 });
        assert!(supervisor.contains(spawned.agent_id).await);
        assert!(registry.contains(spawned.agent_id).await);
        assert!(supervisor.processes().await[0].registered);

        let termination = supervisor.kill(spawned.agent_id).await.unwrap();
        assert_eq!(termination.status, "terminated");
        assert!(!supervisor.contains(spawned.agent_id).await);
        assert!(!registry.contains(spawned.agent_id).await);
        assert!(launcher.flags(0).terminated.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ids_and_ports_are_monotonic() {
        let (supervisor, launcher, _registry) = supervisor_with(FakeBehavior::Registers);

        let first = supervisor.spawn().await.unwrap();
        supervisor.kill(first.agent_id).await.unwrap();
        let second = supervisor.spawn().await.unwrap();

        assert_eq!(second.agent_id, AgentId(1));
        assert_eq!(second.port, 50052);
        let launched = launcher.launched.lock();
        assert_eq!(launched[1].0.manager_address, "localhost:50050");
    }

    #[tokio::test(start_paused = true)]
    async fn test_registration_timeout_terminates_process() {
        let (supervisor, launcher, registry) = supervisor_with(FakeBehavior::Silent);

        let err = supervisor.spawn().await.unwrap_err();
        assert!(matches!(err, FleetError::RegistrationTimeout(AgentId(0))));

        let flags = launcher.flags(0);
        assert!(flags.terminated.load(Ordering::SeqCst));
        assert!(flags.exited.load(Ordering::SeqCst));
        assert!(!flags.killed.load(Ordering::SeqCst));
        assert!(supervisor.processes().await.is_empty());
        assert!(registry.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_registration_timeout_escalates_to_kill() {
        let (supervisor, launcher, _registry) = supervisor_with(FakeBehavior::Stubborn);

        let err = supervisor.spawn().await.unwrap_err();
        assert!(matches!(err, FleetError::RegistrationTimeout(_)));
        assert!(launcher.flags(0).killed.load(Ordering::SeqCst));
        assert!(supervisor.processes().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_early_exit_fails_fast() {
        let (supervisor, _launcher, _registry) = supervisor_with(FakeBehavior::Crashes);

        let started = tokio::time::Instant::now();
        let err = supervisor.spawn().await.unwrap_err();
        assert!(matches!(err, FleetError::ProcessSpawnFailed(_)));
        assert!(started.elapsed() < std::time::Duration::from_secs(5));
        assert!(supervisor.processes().await.is_empty());
    }

    #[tokio::test]
    async fn test_kill_unknown_agent() {
        let (supervisor, _launcher, _registry) = supervisor_with(FakeBehavior::Registers);
        let err = supervisor.kill(AgentId(9)).await.unwrap_err();
        assert!(matches!(err, FleetError::AgentNotFound(AgentId(9))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reap_exited_removes_both_records() {
        let (supervisor, launcher, registry) = supervisor_with(FakeBehavior::Registers);
        let first = supervisor.spawn().await.unwrap();
        let second = supervisor.spawn().await.unwrap();

        launcher.flags(0).exited.store(true, Ordering::SeqCst);

        assert_eq!(supervisor.reap_exited().await, vec![first.agent_id]);
        assert!(!supervisor.contains(first.agent_id).await);
        assert!(!registry.contains(first.agent_id).await);
        assert!(supervisor.contains(second.agent_id).await);
        assert!(registry.contains(second.agent_id).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_all() {
        let (supervisor, _launcher, registry) = supervisor_with(FakeBehavior::Registers);
        supervisor.spawn().await.unwrap();
        supervisor.spawn().await.unwrap();

        supervisor.shutdown_all().await;
        assert!(supervisor.processes().await.is_empty());
        assert!(registry.is_empty().await);
    }
}
