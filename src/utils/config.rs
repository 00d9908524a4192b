// src/utils/config.rs
//! Layered configuration for the control plane and its agents
//!
//! Sources, lowest precedence first:
//!
//! 1. Built-in defaults
//! 2. `config.example.yaml` (optional)
//! 3. `config.yaml` (optional)
//! 4. An explicit file passed with `--config`
//! 5. Environment variables, e.g. `RENDERFLEET__RENDERER__MAX_JOBS=4`

use crate::utils::errors::{FleetError, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "RENDERFLEET";

/// Name of the agent executable looked up next to the control plane binary
pub const AGENT_BINARY_NAME: &str = "renderfleet-agent";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    pub server: ServerConfig,
    pub renderer: RendererConfig,
    pub supervisor: SupervisorConfig,
    pub agent: AgentConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

/// Gateway listener and control channel address
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Gateway bind host
    pub host: String,

    /// Gateway bind port
    pub port: u16,

    /// Address the manager gRPC service binds to and agents dial
    pub manager_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            manager_address: "localhost:50050".to_string(),
        }
    }
}

impl ServerConfig {
    /// Socket address for the gateway listener
    pub fn gateway_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| FleetError::ConfigError(format!("invalid gateway address: {}", e)))
    }
}

/// Renderer engine limits used inside each agent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Default navigation timeout when a job does not set one
    pub timeout_ms: u64,

    /// Engine start attempts per initialization call
    pub max_retries: u32,

    /// Delay between engine start attempts
    pub retry_delay_ms: u64,

    /// Concurrent jobs per agent
    pub max_jobs: usize,

    /// Per-attempt engine start ceiling
    pub launch_timeout_ms: u64,

    /// Engine close ceiling before forced teardown
    pub close_timeout_ms: u64,

    /// User agent sent by the HTTP engine
    pub user_agent: String,

    /// Fail jobs that name an unknown action instead of skipping it
    pub strict_actions: bool,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            max_retries: 3,
            retry_delay_ms: 1_000,
            max_jobs: 10,
            launch_timeout_ms: 30_000,
            close_timeout_ms: 5_000,
            user_agent: concat!("renderfleet/", env!("CARGO_PKG_VERSION")).to_string(),
            strict_actions: false,
        }
    }
}

impl RendererConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn launch_timeout(&self) -> Duration {
        Duration::from_millis(self.launch_timeout_ms)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }
}

/// Process supervisor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Agent executable; defaults to `renderfleet-agent` beside the current binary
    pub agent_binary: Option<PathBuf>,

    /// Port of agent 0; agent `n` listens on `base_port + n`
    pub base_port: u16,

    /// Interval between registration checks
    pub registration_poll_interval_ms: u64,

    /// Registration checks before giving up
    pub registration_poll_attempts: u32,

    /// Grace period between SIGTERM and SIGKILL
    pub terminate_grace_ms: u64,

    /// Interval of the exited-process reaper
    pub reap_interval_ms: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            agent_binary: None,
            base_port: 50051,
            registration_poll_interval_ms: 1_000,
            registration_poll_attempts: 30,
            terminate_grace_ms: 5_000,
            reap_interval_ms: 10_000,
        }
    }
}

impl SupervisorConfig {
    pub fn registration_poll_interval(&self) -> Duration {
        Duration::from_millis(self.registration_poll_interval_ms)
    }

    pub fn terminate_grace(&self) -> Duration {
        Duration::from_millis(self.terminate_grace_ms)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_millis(self.reap_interval_ms)
    }

    /// Resolve the agent executable path
    pub fn resolve_agent_binary(&self) -> Result<PathBuf> {
        if let Some(path) = &self.agent_binary {
            return Ok(path.clone());
        }
        let current = std::env::current_exe()?;
        Ok(current.with_file_name(AGENT_BINARY_NAME))
    }
}

/// Settings used by the agent process itself
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Host the agent advertises on registration
    pub host: String,

    /// Health report period
    pub report_interval_ms: u64,

    /// Grace period for in-flight jobs during shutdown
    pub drain_grace_ms: u64,

    /// Agents export metrics on `port + offset` when set
    pub metrics_port_offset: Option<u16>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            report_interval_ms: 10_000,
            drain_grace_ms: 5_000,
            metrics_port_offset: None,
        }
    }
}

impl AgentConfig {
    pub fn report_interval(&self) -> Duration {
        Duration::from_millis(self.report_interval_ms)
    }

    pub fn drain_grace(&self) -> Duration {
        Duration::from_millis(self.drain_grace_ms)
    }

    /// Exporter settings for the agent serving on `port`
    pub fn metrics_for(&self, port: u16) -> MetricsConfig {
        match self.metrics_port_offset.and_then(|offset| port.checked_add(offset)) {
            Some(metrics_port) => MetricsConfig {
                enabled: true,
                listen: format!("0.0.0.0:{}", metrics_port),
            },
            None => MetricsConfig {
                enabled: false,
                ..MetricsConfig::default()
            },
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Install the Prometheus exporter
    pub enabled: bool,

    /// Exporter listen address
    pub listen: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: "0.0.0.0:9100".to_string(),
        }
    }
}

impl MetricsConfig {
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.listen
            .parse()
            .map_err(|e| FleetError::ConfigError(format!("invalid metrics address: {}", e)))
    }
}

impl FleetConfig {
    /// Load configuration, layering an explicit file over the defaults
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder()
            .add_source(File::with_name("config.example").required(false))
            .add_source(File::with_name("config").required(false));

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }

        let config: FleetConfig = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the fleet cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.renderer.max_jobs == 0 {
            return Err(FleetError::ConfigError("renderer.max_jobs must be at least 1".into()));
        }
        if self.supervisor.registration_poll_attempts == 0 {
            return Err(FleetError::ConfigError(
                "supervisor.registration_poll_attempts must be at least 1".into(),
            ));
        }
        if self.agent.report_interval_ms == 0 {
            return Err(FleetError::ConfigError(
                "agent.report_interval_ms must be greater than 0".into(),
            ));
        }
        self.server.gateway_addr()?;
        if self.metrics.enabled {
            self.metrics.listen_addr()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = FleetConfig::default();
        assert_eq!(config.renderer.max_jobs, 10);
        assert_eq!(config.renderer.max_retries, 3);
        assert_eq!(config.supervisor.base_port, 50051);
        assert_eq!(config.supervisor.registration_poll_attempts, 30);
        assert_eq!(config.agent.report_interval(), Duration::from_secs(10));
        assert_eq!(config.supervisor.terminate_grace(), Duration::from_secs(5));
        assert_eq!(config.server.manager_address, "localhost:50050");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "renderer:\n  max_jobs: 2\n  strict_actions: true\nsupervisor:\n  base_port: 6000\nlogging:\n  format: json"
        )
        .unwrap();

        let config = FleetConfig::load_from(Some(file.path())).unwrap();
        assert_eq!(config.renderer.max_jobs, 2);
        assert!(config.renderer.strict_actions);
        assert_eq!(config.supervisor.base_port, 6000);
        assert_eq!(config.logging.format, LogFormat::Json);
        // Untouched keys keep their defaults
        assert_eq!(config.renderer.timeout_ms, 30_000);
    }

    #[test]
    fn test_validation() {
        let mut config = FleetConfig::default();
        config.renderer.max_jobs = 0;
        assert!(config.validate().is_err());

        let mut config = FleetConfig::default();
        config.supervisor.registration_poll_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = FleetConfig::default();
        config.metrics.enabled = true;
        config.metrics.listen = "not-an-address".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_agent_metrics_port() {
        let mut agent = AgentConfig::default();
        assert!(!agent.metrics_for(50052).enabled);

        agent.metrics_port_offset = Some(1000);
        let metrics = agent.metrics_for(50052);
        assert!(metrics.enabled);
        assert_eq!(metrics.listen_addr().unwrap().port(), 51052);

        assert!(!agent.metrics_for(u16::MAX).enabled);
    }

    #[test]
    fn test_agent_binary_override() {
        let config = SupervisorConfig {
            agent_binary: Some(PathBuf::from("/opt/agent")),
            ..Default::default()
        };
        assert_eq!(config.resolve_agent_binary().unwrap(), PathBuf::from("/opt/agent"));

        let resolved = SupervisorConfig::default().resolve_agent_binary().unwrap();
        assert!(resolved.ends_with(AGENT_BINARY_NAME));
    }
}
