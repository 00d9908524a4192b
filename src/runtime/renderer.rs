// src/runtime/renderer.rs
//! Renderer seam: the engine an agent drives to execute jobs
//!
//! The agent runtime only knows these traits. An engine is started through a
//! [`RendererLauncher`], hands out isolated [`BrowsingContext`]s, and reports
//! whether it is still connected for health reporting.

use crate::model::{CookieRecord, LoadStrategy};
use crate::runtime::actions::PageAction;
use crate::utils::errors::{FleetError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Proxy credentials parsed from `user:pass@host:port`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyCredentials {
    pub server: String,
    pub username: String,
    pub password: String,
}

impl ProxyCredentials {
    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = || FleetError::InvalidProxy(raw.to_string());

        let parts: Vec<&str> = raw.split('@').collect();
        let [creds, server] = parts.as_slice() else {
            return Err(invalid());
        };
        let creds: Vec<&str> = creds.split(':').collect();
        let [username, password] = creds.as_slice() else {
            return Err(invalid());
        };
        if username.is_empty() || server.is_empty() {
            return Err(invalid());
        }

        Ok(Self {
            server: server.to_string(),
            username: username.to_string(),
            password: password.to_string(),
        })
    }

    /// Proxy URL with an `http://` scheme when none was given
    pub fn server_url(&self) -> String {
        if self.server.contains("://") {
            self.server.clone()
        } else {
            format!("http://{}", self.server)
        }
    }
}

/// Settings for a fresh browsing context
#[derive(Debug, Clone, Default)]
pub struct ContextOptions {
    pub proxy: Option<ProxyCredentials>,
    pub extra_headers: HashMap<String, String>,
}

/// Aborts requests whose URL ends with one of the suffixes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockList {
    suffixes: Vec<String>,
}

impl BlockList {
    pub fn new(suffixes: Vec<String>) -> Self {
        Self {
            suffixes: suffixes.into_iter().filter(|s| !s.is_empty()).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.suffixes.is_empty()
    }

    pub fn blocks(&self, url: &str) -> bool {
        self.suffixes.iter().any(|s| url.ends_with(s.as_str()))
    }
}

/// Main-document response of a navigation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NavigationResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
}

/// One isolated page with its own cookies, proxy and headers
#[async_trait]
pub trait BrowsingContext: Send {
    /// Install a request filter; matching requests are aborted
    fn set_block_list(&mut self, block: BlockList);

    /// Navigate and wait for `wait_until`
    ///
    /// Fails with `NavigationTimeout` when `timeout` elapses.
    async fn navigate(
        &mut self,
        url: &str,
        timeout: Duration,
        wait_until: LoadStrategy,
    ) -> Result<NavigationResponse>;

    async fn perform(&mut self, action: &PageAction) -> Result<()>;

    /// Current document content
    async fn content(&mut self) -> Result<String>;

    /// Every cookie the context holds
    async fn cookies(&mut self) -> Result<Vec<CookieRecord>>;

    async fn close(&mut self) -> Result<()>;
}

/// A running renderer engine
#[async_trait]
pub trait RenderEngine: Send + Sync {
    /// Whether the engine is alive; drives the agent's health status
    fn is_connected(&self) -> bool;

    async fn new_context(&self, options: ContextOptions) -> Result<Box<dyn BrowsingContext>>;

    /// Orderly shutdown
    async fn close(&self) -> Result<()>;

    /// Unconditional teardown after a failed or timed-out close
    fn force_close(&self);
}

/// Starts renderer engines
#[async_trait]
pub trait RendererLauncher: Send + Sync {
    async fn launch(&self) -> Result<Arc<dyn RenderEngine>>;
}
