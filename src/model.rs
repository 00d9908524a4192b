// src/model.rs
//! Fleet data model shared by the control plane, the gateway and the agents

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Status reported in-band when navigation exceeds the job timeout
pub const NAVIGATION_TIMEOUT_STATUS: i32 = 418;

/// Status reported in-band for every other job failure
pub const RENDER_FAILURE_STATUS: i32 = 518;

/// Supervisor-assigned agent identifier, never reused within a process lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub u64);

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "agent-{}", self.0)
    }
}

impl FromStr for AgentId {
    type Err = std::num::ParseIntError;

    /// Accepts both `7` and `agent-7`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix("agent-").unwrap_or(s);
        raw.parse().map(AgentId)
    }
}

/// Self-reported liveness classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    #[default]
    Unknown,
    Healthy,
    Unhealthy,
}

/// Point-in-time copy of an agent record, safe to hand out of the registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub agent_id: AgentId,
    pub host: String,
    pub port: u16,
    pub health_status: HealthStatus,
    pub registered_at: DateTime<Utc>,
    pub last_report_time: DateTime<Utc>,
    pub active_jobs: u32,
    pub cpu_load: f32,
    pub memory_load: f32,
}

/// Page readiness condition navigation waits for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadStrategy {
    Commit,
    DomContentLoaded,
    Load,
    #[default]
    NetworkIdle,
}

impl LoadStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadStrategy::Commit => "commit",
            LoadStrategy::DomContentLoaded => "domcontentloaded",
            LoadStrategy::Load => "load",
            LoadStrategy::NetworkIdle => "networkidle",
        }
    }
}

impl FromStr for LoadStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "commit" => Ok(LoadStrategy::Commit),
            "domcontentloaded" => Ok(LoadStrategy::DomContentLoaded),
            "load" => Ok(LoadStrategy::Load),
            "networkidle" => Ok(LoadStrategy::NetworkIdle),
            other => Err(format!("unknown load strategy '{}'", other)),
        }
    }
}

/// Scalar keyword-argument value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgValue {
    Bool(bool),
    Int(i64),
    Double(f64),
    Str(String),
}

impl ArgValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ArgValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view; integers widen to `f64`
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ArgValue::Int(i) => Some(*i as f64),
            ArgValue::Double(d) => Some(*d),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionArgument {
    pub name: String,
    pub value: ArgValue,
}

/// A named page action with keyword arguments, as submitted by a client
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct JobAction {
    pub name: String,
    #[serde(default)]
    pub args: Vec<ActionArgument>,
}

impl JobAction {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
        }
    }

    pub fn with_arg(mut self, name: impl Into<String>, value: ArgValue) -> Self {
        self.args.push(ActionArgument {
            name: name.into(),
            value,
        });
        self
    }

    /// Look up an argument by keyword
    pub fn arg(&self, name: &str) -> Option<&ArgValue> {
        self.args.iter().find(|a| a.name == name).map(|a| &a.value)
    }
}

/// A rendering request
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Job {
    /// Target URL
    pub url: String,

    /// Proxy credentials shaped `user:pass@host:port`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,

    /// Navigation timeout; the agent default applies when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    /// Wait-until strategy; `networkidle` when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load: Option<LoadStrategy>,

    /// Ordered page actions run after navigation
    #[serde(default)]
    pub actions: Vec<JobAction>,

    /// Extra request headers
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Resource URL suffixes to abort, e.g. `.png`
    #[serde(default)]
    pub block: Vec<String>,
}

impl Job {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CookieRecord {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    /// Unix seconds; `-1` for session cookies
    pub expires: i64,
    pub http_only: bool,
    pub secure: bool,
    pub same_site: String,
}

/// Result envelope for a job; failures are carried in-band
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RenderResult {
    pub status: i32,
    pub content: String,
    pub error: String,
    pub headers: HashMap<String, String>,
    pub cookies: Vec<CookieRecord>,
}

impl RenderResult {
    /// Failure envelope with an empty body
    pub fn failure(status: i32, error: impl Into<String>) -> Self {
        Self {
            status,
            error: error.into(),
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_empty()
    }
}
