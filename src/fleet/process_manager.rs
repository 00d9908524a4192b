// src/fleet/process_manager.rs
//! Process manager for spawning and stopping agent processes
//!
//! The supervisor only sees the [`ProcessLauncher`] / [`ProcessHandle`]
//! capabilities: start, wait-with-timeout, terminate, kill. The production
//! launcher runs the `renderfleet-agent` binary through `tokio::process`.

use crate::model::AgentId;
use crate::utils::errors::{FleetError, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// Extra wait after SIGKILL before giving up on reaping the child
const KILL_WAIT: Duration = Duration::from_secs(1);

/// Arguments handed to a new agent process
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub agent_id: AgentId,
    pub port: u16,
    pub manager_address: String,
}

impl LaunchSpec {
    /// Command-line arguments understood by `renderfleet-agent`
    pub fn args(&self) -> Vec<String> {
        vec![
            "--id".to_string(),
            self.agent_id.0.to_string(),
            "--port".to_string(),
            self.port.to_string(),
            "--manager".to_string(),
            self.manager_address.clone(),
        ]
    }
}

/// Control over one running OS process
#[async_trait]
pub trait ProcessHandle: Send {
    /// OS process id, if the process has not been reaped
    fn pid(&self) -> Option<u32>;

    /// Ask the process to exit (SIGTERM)
    async fn terminate(&mut self) -> Result<()>;

    /// Force the process to exit (SIGKILL)
    async fn kill(&mut self) -> Result<()>;

    /// Wait up to `timeout` for exit; `true` once the process is gone
    async fn wait_timeout(&mut self, timeout: Duration) -> Result<bool>;

    /// Non-blocking exit check
    fn has_exited(&mut self) -> Result<bool>;
}

/// Starts agent processes
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    async fn launch(&self, spec: &LaunchSpec) -> Result<Box<dyn ProcessHandle>>;
}

/// Terminate with a grace period, escalating to a kill
///
/// Returns `true` if the process exited within the grace period on its own.
pub async fn stop_process(process: &mut dyn ProcessHandle, grace: Duration) -> Result<bool> {
    if process.has_exited()? {
        return Ok(true);
    }

    process.terminate().await?;
    if process.wait_timeout(grace).await? {
        return Ok(true);
    }

    warn!(pid = ?process.pid(), "Process still alive after {:?}, sending SIGKILL", grace);
    process.kill().await?;
    if !process.wait_timeout(KILL_WAIT).await? {
        warn!(pid = ?process.pid(), "Process did not exit after SIGKILL");
    }
    Ok(false)
}

/// Launches the agent executable as a child process
#[derive(Debug, Clone)]
pub struct CommandLauncher {
    /// Path to the agent executable
    program: PathBuf,
}

impl CommandLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl ProcessLauncher for CommandLauncher {
    async fn launch(&self, spec: &LaunchSpec) -> Result<Box<dyn ProcessHandle>> {
        debug!(agent_id = %spec.agent_id, program = ?self.program, "Spawning agent process");

        let mut command = Command::new(&self.program);
        command.args(spec.args());

        // Agents inherit the environment and log to the control plane's stdout/stderr
        command
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let child = command.spawn().map_err(|e| {
            FleetError::ProcessSpawnFailed(format!("failed to spawn {:?}: {}", self.program, e))
        })?;

        info!(agent_id = %spec.agent_id, pid = ?child.id(), port = spec.port, "Agent process spawned");
        Ok(Box::new(ChildProcess::new(child)))
    }
}

/// [`ProcessHandle`] over a `tokio::process::Child`
#[derive(Debug)]
pub struct ChildProcess {
    child: Child,
}

impl ChildProcess {
    pub fn new(child: Child) -> Self {
        Self { child }
    }
}

#[async_trait]
impl ProcessHandle for ChildProcess {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    async fn terminate(&mut self) -> Result<()> {
        let Some(pid) = self.child.id() else {
            return Ok(());
        };
        send_sigterm(pid)
    }

    async fn kill(&mut self) -> Result<()> {
        match self.child.start_kill() {
            Ok(()) => Ok(()),
            // Already reaped
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn wait_timeout(&mut self, timeout: Duration) -> Result<bool> {
        match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(Ok(status)) => {
                debug!("Process exited with status: {}", status);
                Ok(true)
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Ok(false),
        }
    }

    fn has_exited(&mut self) -> Result<bool> {
        Ok(self.child.try_wait()?.is_some())
    }
}

#[cfg(unix)]
fn send_sigterm(pid: u32) -> Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    debug!("Sending SIGTERM to PID {}", pid);
    match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(FleetError::RuntimeError(format!("Failed to send SIGTERM: {}", e))),
    }
}

#[cfg(not(unix))]
fn send_sigterm(pid: u32) -> Result<()> {
    warn!("Graceful termination not supported on this platform (PID {})", pid);
    Ok(())
}
