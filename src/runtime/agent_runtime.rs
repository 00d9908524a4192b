// src/runtime/agent_runtime.rs
//! Agent runtime: renderer lifecycle and job execution
//!
//! ```text
//! STARTING ──initialize_renderer──▶ READY ◀──▶ SERVING (jobs in flight)
//!                                     │
//!                      begin_shutdown │ (SIGTERM / SIGINT)
//!                                     ▼
//!                                 DRAINING ──close_renderer──▶ STOPPED
//! ```
//!
//! A job runs in a fresh browsing context that is closed on every exit path.
//! Job failures never surface as errors: navigation timeouts come back with
//! status 418 and everything else with 518. Only capacity and shutdown
//! rejections are returned as `Err`.

use crate::model::{Job, RenderResult, NAVIGATION_TIMEOUT_STATUS, RENDER_FAILURE_STATUS};
use crate::runtime::actions::PageAction;
use crate::runtime::capacity::CapacityGuard;
use crate::runtime::renderer::{
    BlockList, BrowsingContext, ContextOptions, ProxyCredentials, RenderEngine, RendererLauncher,
};
use crate::utils::config::RendererConfig;
use crate::utils::errors::{FleetError, Result};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const IDLE_POLL: Duration = Duration::from_millis(25);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Starting,
    Ready,
    Serving,
    Draining,
    Stopped,
}

/// Renderer state for one agent process
pub struct AgentRuntime {
    config: RendererConfig,
    launcher: Arc<dyn RendererLauncher>,
    engine: RwLock<Option<Arc<dyn RenderEngine>>>,
    /// Serializes engine start so concurrent first jobs launch once
    init_lock: Mutex<()>,
    capacity: CapacityGuard,
    shutdown: CancellationToken,
    stopped: AtomicBool,
}

impl AgentRuntime {
    pub fn new(config: RendererConfig, launcher: Arc<dyn RendererLauncher>) -> Self {
        let capacity = CapacityGuard::new(config.max_jobs);
        Self {
            config,
            launcher,
            engine: RwLock::new(None),
            init_lock: Mutex::new(()),
            capacity,
            shutdown: CancellationToken::new(),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> AgentState {
        if self.stopped.load(Ordering::Acquire) {
            AgentState::Stopped
        } else if self.shutdown.is_cancelled() {
            AgentState::Draining
        } else if self.engine.read().is_none() {
            AgentState::Starting
        } else if self.capacity.active() > 0 {
            AgentState::Serving
        } else {
            AgentState::Ready
        }
    }

    /// Whether the engine exists and reports itself connected
    pub fn is_healthy(&self) -> bool {
        self.engine
            .read()
            .as_ref()
            .map(|engine| engine.is_connected())
            .unwrap_or(false)
    }

    pub fn active_jobs(&self) -> usize {
        self.capacity.active()
    }

    /// Token cancelled once shutdown starts
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    fn connected_engine(&self) -> Option<Arc<dyn RenderEngine>> {
        self.engine
            .read()
            .as_ref()
            .filter(|engine| engine.is_connected())
            .cloned()
    }

    /// Start the engine, retrying up to `max_retries` times
    ///
    /// Returns the running engine if one is already connected. Failure leaves
    /// the runtime in STARTING so the next call tries again from scratch.
    pub async fn initialize_renderer(&self) -> Result<Arc<dyn RenderEngine>> {
        let _init = self.init_lock.lock().await;
        if let Some(engine) = self.connected_engine() {
            return Ok(engine);
        }

        let attempts = self.config.max_retries.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match tokio::time::timeout(self.config.launch_timeout(), self.launcher.launch()).await {
                Ok(Ok(engine)) => {
                    info!(attempt, "Renderer engine started");
                    *self.engine.write() = Some(Arc::clone(&engine));
                    return Ok(engine);
                }
                Ok(Err(e)) => last_error = e.to_string(),
                Err(_) => {
                    last_error = format!(
                        "launch exceeded {} ms",
                        self.config.launch_timeout().as_millis()
                    )
                }
            }

            warn!(attempt, attempts, error = %last_error, "Renderer start failed");
            if attempt < attempts {
                tokio::time::sleep(self.config.retry_delay()).await;
            }
        }

        Err(FleetError::RendererInit(format!(
            "gave up after {} attempts: {}",
            attempts, last_error
        )))
    }

    /// Execute one job
    ///
    /// `Err` is reserved for `ShuttingDown` and `CapacityExceeded`; every
    /// other outcome is an in-band [`RenderResult`].
    pub async fn render(&self, job: Job) -> Result<RenderResult> {
        if self.shutdown.is_cancelled() {
            return Err(FleetError::ShuttingDown);
        }
        let _permit = self.capacity.acquire()?;

        let result = match self.execute(&job).await {
            Ok(result) => result,
            Err(err @ FleetError::NavigationTimeout(_)) => {
                warn!(url = %job.url, error = %err, "Navigation timed out");
                RenderResult::failure(NAVIGATION_TIMEOUT_STATUS, err.to_string())
            }
            Err(err) => {
                error!(url = %job.url, error = %err, "Render failed");
                RenderResult::failure(RENDER_FAILURE_STATUS, err.to_string())
            }
        };

        metrics::counter!("agent_jobs_total", "status" => result.status.to_string()).increment(1);
        Ok(result)
    }

    async fn execute(&self, job: &Job) -> Result<RenderResult> {
        let engine = match self.connected_engine() {
            Some(engine) => engine,
            None => self.initialize_renderer().await?,
        };

        let options = ContextOptions {
            proxy: job.proxy.as_deref().map(ProxyCredentials::parse).transpose()?,
            extra_headers: job.headers.clone(),
        };
        let mut context = engine.new_context(options).await?;

        let outcome = self.run_in_context(context.as_mut(), job).await;
        if let Err(e) = context.close().await {
            warn!(error = %e, "Failed to close browsing context");
        }
        outcome
    }

    async fn run_in_context(
        &self,
        context: &mut dyn BrowsingContext,
        job: &Job,
    ) -> Result<RenderResult> {
        let block = BlockList::new(job.block.clone());
        if !block.is_empty() {
            context.set_block_list(block);
        }

        let timeout = job
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.config.timeout());
        let response = context
            .navigate(&job.url, timeout, job.load.unwrap_or_default())
            .await?;

        for action in &job.actions {
            match PageAction::from_job_action(action) {
                Ok(page_action) => {
                    debug!(action = page_action.name(), "Performing action");
                    context.perform(&page_action).await?;
                }
                Err(FleetError::UnknownAction(name)) if !self.config.strict_actions => {
                    warn!(action = %name, "Skipping unknown action");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(RenderResult {
            status: i32::from(response.status),
            content: context.content().await?,
            error: String::new(),
            headers: response.headers,
            cookies: context.cookies().await?,
        })
    }

    /// Reject new jobs from now on
    pub fn begin_shutdown(&self) {
        if !self.shutdown.is_cancelled() {
            info!(active_jobs = self.active_jobs(), "Agent draining");
            self.shutdown.cancel();
        }
    }

    /// Wait until no job is in flight; `false` if `grace` elapsed first
    pub async fn wait_idle(&self, grace: Duration) -> bool {
        tokio::time::timeout(grace, async {
            while self.capacity.active() > 0 {
                tokio::time::sleep(IDLE_POLL).await;
            }
        })
        .await
        .is_ok()
    }

    /// Close the engine within `close_timeout`, forcing teardown past it
    pub async fn close_renderer(&self) {
        let engine = self.engine.write().take();
        if let Some(engine) = engine {
            match tokio::time::timeout(self.config.close_timeout(), engine.close()).await {
                Ok(Ok(())) => debug!("Renderer engine closed"),
                Ok(Err(e)) => {
                    warn!(error = %e, "Renderer close failed, forcing teardown");
                    engine.force_close();
                }
                Err(_) => {
                    warn!("Renderer close timed out, forcing teardown");
                    engine.force_close();
                }
            }
        }
        self.stopped.store(true, Ordering::Release);
    }

    /// Full shutdown: reject, drain within `grace`, close the engine
    pub async fn shutdown(&self, grace: Duration) {
        self.begin_shutdown();
        if !self.wait_idle(grace).await {
            warn!(
                active_jobs = self.active_jobs(),
                "Drain grace elapsed with jobs in flight"
            );
        }
        self.close_renderer().await;
        info!("Agent stopped");
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scriptable engine for runtime and service tests

    use super::*;
    use crate::model::{CookieRecord, LoadStrategy};
    use crate::runtime::renderer::NavigationResponse;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug, Clone, Default)]
    pub struct FakeScript {
        /// Navigation never completes on its own
        pub hang_navigation: bool,
        /// `close` never completes
        pub hang_close: bool,
        /// Launch attempts that fail before one succeeds
        pub failing_launches: usize,
    }

    #[derive(Debug, Default)]
    pub struct FakeCounters {
        pub launches: AtomicUsize,
        pub contexts_opened: AtomicUsize,
        pub contexts_closed: AtomicUsize,
        pub actions: parking_lot::Mutex<Vec<String>>,
        pub last_options: parking_lot::Mutex<Option<ContextOptions>>,
        pub force_closed: AtomicBool,
    }

    pub struct FakeLauncher {
        pub script: FakeScript,
        pub counters: Arc<FakeCounters>,
    }

    impl FakeLauncher {
        pub fn new(script: FakeScript) -> Arc<Self> {
            Arc::new(Self {
                script,
                counters: Arc::new(FakeCounters::default()),
            })
        }
    }

    #[async_trait]
    impl RendererLauncher for FakeLauncher {
        async fn launch(&self) -> Result<Arc<dyn RenderEngine>> {
            let n = self.counters.launches.fetch_add(1, Ordering::SeqCst);
            if n < self.script.failing_launches {
                return Err(FleetError::RendererInit("browser crashed".into()));
            }
            Ok(Arc::new(FakeEngine {
                script: self.script.clone(),
                counters: Arc::clone(&self.counters),
                connected: AtomicBool::new(true),
            }))
        }
    }

    struct FakeEngine {
        script: FakeScript,
        counters: Arc<FakeCounters>,
        connected: AtomicBool,
    }

    #[async_trait]
    impl RenderEngine for FakeEngine {
        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        async fn new_context(&self, options: ContextOptions) -> Result<Box<dyn BrowsingContext>> {
            self.counters.contexts_opened.fetch_add(1, Ordering::SeqCst);
            *self.counters.last_options.lock() = Some(options);
            Ok(Box::new(FakeContext {
                script: self.script.clone(),
                counters: Arc::clone(&self.counters),
            }))
        }

        async fn close(&self) -> Result<()> {
            if self.script.hang_close {
                std::future::pending::<()>().await;
            }
            self.connected.store(false, Ordering::SeqCst);
            Ok(())
        }

        fn force_close(&self) {
            self.counters.force_closed.store(true, Ordering::SeqCst);
            self.connected.store(false, Ordering::SeqCst);
        }
    }

    struct FakeContext {
        script: FakeScript,
        counters: Arc<FakeCounters>,
    }

    #[async_trait]
    impl BrowsingContext for FakeContext {
        fn set_block_list(&mut self, _block: BlockList) {}

        async fn navigate(
            &mut self,
            url: &str,
            timeout: Duration,
            _wait_until: LoadStrategy,
        ) -> Result<NavigationResponse> {
            if self.script.hang_navigation {
                return tokio::time::timeout(timeout, std::future::pending::<()>())
                    .await
                    .map(|_| NavigationResponse::default())
                    .map_err(|_| FleetError::NavigationTimeout(url.to_string()));
            }
            Ok(NavigationResponse {
                status: 200,
                headers: HashMap::from([("content-type".to_string(), "text/html".to_string())]),
            })
        }

        async fn perform(&mut self, action: &PageAction) -> Result<()> {
            self.counters.actions.lock().push(action.name().to_string());
            Ok(())
        }

        async fn content(&mut self) -> Result<String> {
            Ok("<html>ok</html>".to_string())
        }

        async fn cookies(&mut self) -> Result<Vec<CookieRecord>> {
            Ok(vec![CookieRecord {
                name: "sid".into(),
                value: "1".into(),
                domain: "example.com".into(),
                path: "/".into(),
                expires: -1,
                ..Default::default()
            }])
        }

        async fn close(&mut self) -> Result<()> {
            self.counters.contexts_closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    pub fn runtime_with(script: FakeScript, config: RendererConfig) -> (Arc<AgentRuntime>, Arc<FakeCounters>) {
        let launcher = FakeLauncher::new(script);
        let counters = Arc::clone(&launcher.counters);
        (Arc::new(AgentRuntime::new(config, launcher)), counters)
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::model::{ArgValue, JobAction};
    use std::sync::atomic::Ordering;

    fn fast_config() -> RendererConfig {
        RendererConfig {
            retry_delay_ms: 10,
            ..RendererConfig::default()
        }
    }

    #[tokio::test]
    async fn test_successful_render() {
        let (runtime, counters) = runtime_with(FakeScript::default(), fast_config());
        assert_eq!(runtime.state(), AgentState::Starting);

        let result = runtime.render(Job::new("https://example.com")).await.unwrap();

        assert_eq!(result.status, 200);
        assert_eq!(result.content, "<html>ok</html>");
        assert!(result.is_success());
        assert_eq!(result.cookies.len(), 1);
        assert_eq!(runtime.state(), AgentState::Ready);
        assert!(runtime.is_healthy());
        assert_eq!(counters.contexts_closed.load(Ordering::SeqCst), 1);
        assert_eq!(runtime.active_jobs(), 0);
    }

    #[tokio::test]
    async fn test_navigation_timeout_is_418() {
        let script = FakeScript {
            hang_navigation: true,
            ..Default::default()
        };
        let (runtime, counters) = runtime_with(script, fast_config());

        let mut job = Job::new("https://slow.example.com");
        job.timeout_ms = Some(1);
        let result = runtime.render(job).await.unwrap();

        assert_eq!(result.status, NAVIGATION_TIMEOUT_STATUS);
        assert!(!result.error.is_empty());
        assert_eq!(counters.contexts_closed.load(Ordering::SeqCst), 1);
        assert_eq!(runtime.active_jobs(), 0);
    }

    #[tokio::test]
    async fn test_configured_timeout_applies_without_job_timeout() {
        let script = FakeScript {
            hang_navigation: true,
            ..Default::default()
        };
        let config = RendererConfig {
            timeout_ms: 1,
            ..fast_config()
        };
        let (runtime, _) = runtime_with(script, config);

        let result = runtime.render(Job::new("https://slow.example.com")).await.unwrap();
        assert_eq!(result.status, NAVIGATION_TIMEOUT_STATUS);
    }

    #[tokio::test]
    async fn test_malformed_proxy_is_518() {
        let (runtime, counters) = runtime_with(FakeScript::default(), fast_config());

        let mut job = Job::new("https://example.com");
        job.proxy = Some("no-credentials.example.com:3128".into());
        let result = runtime.render(job).await.unwrap();

        assert_eq!(result.status, RENDER_FAILURE_STATUS);
        assert!(result.error.contains("proxy"));
        assert_eq!(counters.contexts_opened.load(Ordering::SeqCst), 0);
        assert!(runtime.is_healthy());
    }

    #[tokio::test]
    async fn test_proxy_and_headers_reach_context() {
        let (runtime, counters) = runtime_with(FakeScript::default(), fast_config());

        let mut job = Job::new("https://example.com");
        job.proxy = Some("alice:pw@proxy.local:3128".into());
        job.headers.insert("x-trace".into(), "1".into());
        runtime.render(job).await.unwrap();

        let options = counters.last_options.lock().clone().unwrap();
        assert_eq!(options.proxy.unwrap().username, "alice");
        assert_eq!(options.extra_headers.get("x-trace").unwrap(), "1");
    }

    #[tokio::test]
    async fn test_unknown_action_skipped_by_default() {
        let (runtime, counters) = runtime_with(FakeScript::default(), fast_config());

        let mut job = Job::new("https://example.com");
        job.actions = vec![
            JobAction::new("scroll_to_moon"),
            JobAction::new("wait_for_timeout").with_arg("timeout", ArgValue::Int(1)),
        ];
        let result = runtime.render(job).await.unwrap();

        assert_eq!(result.status, 200);
        assert_eq!(*counters.actions.lock(), vec!["wait_for_timeout".to_string()]);
    }

    #[tokio::test]
    async fn test_unknown_action_fails_when_strict() {
        let config = RendererConfig {
            strict_actions: true,
            ..fast_config()
        };
        let (runtime, counters) = runtime_with(FakeScript::default(), config);

        let mut job = Job::new("https://example.com");
        job.actions = vec![JobAction::new("scroll_to_moon")];
        let result = runtime.render(job).await.unwrap();

        assert_eq!(result.status, RENDER_FAILURE_STATUS);
        assert!(result.error.contains("scroll_to_moon"));
        assert_eq!(counters.contexts_closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_init_retries_up_to_limit() {
        let script = FakeScript {
            failing_launches: 2,
            ..Default::default()
        };
        let (runtime, counters) = runtime_with(script, fast_config());
        assert!(runtime.initialize_renderer().await.is_ok());
        assert_eq!(counters.launches.load(Ordering::SeqCst), 3);

        let script = FakeScript {
            failing_launches: 10,
            ..Default::default()
        };
        let (runtime, counters) = runtime_with(script, fast_config());
        let Err(err) = runtime.initialize_renderer().await else {
            panic!("renderer init should give up");
        };
        assert!(matches!(err, FleetError::RendererInit(_)));
        assert_eq!(counters.launches.load(Ordering::SeqCst), 3);
        assert_eq!(runtime.state(), AgentState::Starting);

        // The next job starts over
        let result = runtime.render(Job::new("https://example.com")).await.unwrap();
        assert_eq!(result.status, RENDER_FAILURE_STATUS);
        assert_eq!(counters.launches.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn test_capacity_rejection() {
        let script = FakeScript {
            hang_navigation: true,
            ..Default::default()
        };
        let config = RendererConfig {
            max_jobs: 1,
            ..fast_config()
        };
        let (runtime, _) = runtime_with(script, config);

        let busy = Arc::clone(&runtime);
        let running = tokio::spawn(async move {
            let mut job = Job::new("https://slow.example.com");
            job.timeout_ms = Some(200);
            busy.render(job).await
        });
        while runtime.active_jobs() == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert_eq!(runtime.state(), AgentState::Serving);

        let err = runtime.render(Job::new("https://example.com")).await.unwrap_err();
        assert!(matches!(err, FleetError::CapacityExceeded(_)));

        let first = running.await.unwrap().unwrap();
        assert_eq!(first.status, NAVIGATION_TIMEOUT_STATUS);
        assert_eq!(runtime.active_jobs(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_rejects_and_closes_engine() {
        let (runtime, counters) = runtime_with(FakeScript::default(), fast_config());
        runtime.initialize_renderer().await.unwrap();

        runtime.shutdown(Duration::from_millis(100)).await;

        assert_eq!(runtime.state(), AgentState::Stopped);
        assert!(!runtime.is_healthy());
        assert!(!counters.force_closed.load(Ordering::SeqCst));
        let err = runtime.render(Job::new("https://example.com")).await.unwrap_err();
        assert!(matches!(err, FleetError::ShuttingDown));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_timeout_forces_teardown() {
        let script = FakeScript {
            hang_close: true,
            ..Default::default()
        };
        let (runtime, counters) = runtime_with(script, fast_config());
        runtime.initialize_renderer().await.unwrap();

        runtime.begin_shutdown();
        assert_eq!(runtime.state(), AgentState::Draining);
        runtime.close_renderer().await;

        assert!(counters.force_closed.load(Ordering::SeqCst));
        assert_eq!(runtime.state(), AgentState::Stopped);
    }
}
