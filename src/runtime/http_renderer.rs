// src/runtime/http_renderer.rs
//! HTTP renderer engine built on `reqwest`
//!
//! Fetches documents without executing scripts. Each context owns its own
//! client, so cookie jars, proxy credentials and default headers never leak
//! between jobs.
//!
//! ```text
//! HttpRendererLauncher ──launch──▶ HttpEngine ──new_context──▶ HttpContext
//!                                     │                          │
//!                                 connected flag            reqwest::Client
//!                                                          (cookie jar, proxy)
//! ```
//!
//! Redirects are followed here rather than by `reqwest`, so every hop passes
//! the block list and leaves its cookies in the context.
//!
//! Load strategies all resolve once the body has been read. DOM actions
//! (`click`, `fill`, `press`, `evaluate`) are rejected as render errors.

use crate::model::{CookieRecord, LoadStrategy};
use crate::runtime::actions::PageAction;
use crate::runtime::renderer::{
    BlockList, BrowsingContext, ContextOptions, NavigationResponse, RenderEngine,
    RendererLauncher,
};
use crate::utils::config::RendererConfig;
use crate::utils::errors::{FleetError, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, LOCATION};
use reqwest::{redirect, Response, Url};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};
use tracing::debug;

/// Redirect hops followed per navigation
const MAX_REDIRECTS: usize = 10;

/// Starts [`HttpEngine`]s with the configured user agent
#[derive(Debug, Clone)]
pub struct HttpRendererLauncher {
    user_agent: String,
    default_timeout: Duration,
}

impl HttpRendererLauncher {
    pub fn new(config: &RendererConfig) -> Self {
        Self {
            user_agent: config.user_agent.clone(),
            default_timeout: config.timeout(),
        }
    }
}

#[async_trait]
impl RendererLauncher for HttpRendererLauncher {
    async fn launch(&self) -> Result<Arc<dyn RenderEngine>> {
        // Probe the TLS backend
        reqwest::Client::builder()
            .user_agent(self.user_agent.as_str())
            .build()
            .map_err(|e| FleetError::RendererInit(e.to_string()))?;

        debug!(user_agent = %self.user_agent, "HTTP renderer engine started");
        Ok(Arc::new(HttpEngine {
            user_agent: self.user_agent.clone(),
            default_timeout: self.default_timeout,
            connected: AtomicBool::new(true),
        }))
    }
}

#[derive(Debug)]
pub struct HttpEngine {
    user_agent: String,
    /// Navigation timeout for a `goto` issued before any navigation
    default_timeout: Duration,
    connected: AtomicBool,
}

impl HttpEngine {
    fn build_client(&self, options: &ContextOptions) -> Result<reqwest::Client> {
        let mut headers = HeaderMap::new();
        for (name, value) in &options.extra_headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| FleetError::Render(format!("invalid header name '{}': {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| FleetError::Render(format!("invalid header value: {}", e)))?;
            headers.insert(name, value);
        }

        let mut builder = reqwest::Client::builder()
            .user_agent(self.user_agent.as_str())
            .default_headers(headers)
            .redirect(redirect::Policy::none())
            .cookie_store(true);

        builder = match &options.proxy {
            Some(proxy) => {
                let proxy = reqwest::Proxy::all(proxy.server_url())
                    .map_err(|e| FleetError::InvalidProxy(e.to_string()))?
                    .basic_auth(&proxy.username, &proxy.password);
                builder.proxy(proxy)
            }
            None => builder.no_proxy(),
        };

        builder.build().map_err(|e| FleetError::Render(e.to_string()))
    }
}

#[async_trait]
impl RenderEngine for HttpEngine {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn new_context(&self, options: ContextOptions) -> Result<Box<dyn BrowsingContext>> {
        if !self.is_connected() {
            return Err(FleetError::Render("renderer engine is closed".into()));
        }
        let client = self.build_client(&options)?;

        Ok(Box::new(HttpContext {
            client,
            default_timeout: self.default_timeout,
            block: BlockList::default(),
            current: None,
            content: String::new(),
            cookies: HashMap::new(),
        }))
    }

    async fn close(&self) -> Result<()> {
        self.connected.store(false, Ordering::Release);
        Ok(())
    }

    fn force_close(&self) {
        self.connected.store(false, Ordering::Release);
    }
}

/// Last navigation, kept for `reload`
#[derive(Debug, Clone)]
struct PageState {
    url: String,
    timeout: Duration,
    wait_until: LoadStrategy,
}

pub struct HttpContext {
    client: reqwest::Client,
    default_timeout: Duration,
    block: BlockList,
    current: Option<PageState>,
    content: String,
    cookies: HashMap<(String, String, String), CookieRecord>,
}

impl HttpContext {
    /// GET `url`, following redirects until a final response
    async fn fetch(&mut self, url: &str) -> Result<NavigationResponse> {
        let mut target = Url::parse(url)
            .map_err(|e| FleetError::Render(format!("invalid url '{}': {}", url, e)))?;

        for _ in 0..=MAX_REDIRECTS {
            if self.block.blocks(target.as_str()) {
                return Err(FleetError::Render(format!("request to {} was blocked", target)));
            }

            let response = self
                .client
                .get(target.clone())
                .send()
                .await
                .map_err(request_error)?;
            self.record_cookies(&response);

            let location = if response.status().is_redirection() {
                response
                    .headers()
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string)
            } else {
                None
            };
            match location {
                Some(location) => {
                    let next = target.join(&location).map_err(|e| {
                        FleetError::Render(format!("invalid redirect to '{}': {}", location, e))
                    })?;
                    debug!(from = %target, to = %next, "following redirect");
                    target = next;
                }
                None => return self.read_document(response).await,
            }
        }

        Err(FleetError::Render(format!(
            "more than {} redirects from {}",
            MAX_REDIRECTS, url
        )))
    }

    async fn read_document(&mut self, response: Response) -> Result<NavigationResponse> {
        let status = response.status().as_u16();
        let mut headers: HashMap<String, String> = HashMap::new();
        for (name, value) in response.headers() {
            let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
            headers
                .entry(name.as_str().to_string())
                .and_modify(|v| {
                    v.push_str(", ");
                    v.push_str(&value);
                })
                .or_insert(value);
        }

        self.content = response.text().await.map_err(request_error)?;
        Ok(NavigationResponse { status, headers })
    }

    fn record_cookies(&mut self, response: &Response) {
        let host = response.url().host_str().unwrap_or_default();
        for cookie in response.cookies() {
            let record = CookieRecord {
                name: cookie.name().to_string(),
                value: cookie.value().to_string(),
                domain: cookie.domain().unwrap_or(host).to_string(),
                path: cookie.path().unwrap_or("/").to_string(),
                expires: cookie
                    .expires()
                    .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                    .map(|d| d.as_secs() as i64)
                    .unwrap_or(-1),
                http_only: cookie.http_only(),
                secure: cookie.secure(),
                same_site: if cookie.same_site_strict() {
                    "Strict"
                } else if cookie.same_site_lax() {
                    "Lax"
                } else {
                    "None"
                }
                .to_string(),
            };
            let key = (record.name.clone(), record.domain.clone(), record.path.clone());
            self.cookies.insert(key, record);
        }
    }
}

fn request_error(err: reqwest::Error) -> FleetError {
    if err.is_timeout() {
        FleetError::NavigationTimeout(err.to_string())
    } else {
        FleetError::Render(err.to_string())
    }
}

#[async_trait]
impl BrowsingContext for HttpContext {
    fn set_block_list(&mut self, block: BlockList) {
        self.block = block;
    }

    async fn navigate(
        &mut self,
        url: &str,
        timeout: Duration,
        wait_until: LoadStrategy,
    ) -> Result<NavigationResponse> {
        debug!(url, wait_until = wait_until.as_str(), "navigating");

        let response = tokio::time::timeout(timeout, self.fetch(url))
            .await
            .map_err(|_| {
                FleetError::NavigationTimeout(format!(
                    "navigation to {} exceeded {} ms",
                    url,
                    timeout.as_millis()
                ))
            })??;

        self.current = Some(PageState {
            url: url.to_string(),
            timeout,
            wait_until,
        });
        Ok(response)
    }

    async fn perform(&mut self, action: &PageAction) -> Result<()> {
        match action {
            PageAction::WaitForTimeout { timeout } => {
                tokio::time::sleep(*timeout).await;
                Ok(())
            }
            PageAction::Reload => {
                let page = self
                    .current
                    .clone()
                    .ok_or_else(|| FleetError::Render("reload before any navigation".into()))?;
                self.navigate(&page.url, page.timeout, page.wait_until).await?;
                Ok(())
            }
            PageAction::Goto { url } => {
                let (timeout, wait_until) = match &self.current {
                    Some(page) => (page.timeout, page.wait_until),
                    None => (self.default_timeout, LoadStrategy::default()),
                };
                self.navigate(url, timeout, wait_until).await?;
                Ok(())
            }
            PageAction::WaitForLoadState { .. } => Ok(()),
            PageAction::Click { .. }
            | PageAction::Fill { .. }
            | PageAction::Press { .. }
            | PageAction::Evaluate { .. } => Err(FleetError::Render(format!(
                "action '{}' needs a DOM and is not supported by the HTTP renderer",
                action.name()
            ))),
        }
    }

    async fn content(&mut self) -> Result<String> {
        Ok(self.content.clone())
    }

    async fn cookies(&mut self) -> Result<Vec<CookieRecord>> {
        let mut cookies: Vec<CookieRecord> = self.cookies.values().cloned().collect();
        cookies.sort_by(|a, b| (&a.domain, &a.name).cmp(&(&b.domain, &b.name)));
        Ok(cookies)
    }

    async fn close(&mut self) -> Result<()> {
        self.current = None;
        Ok(())
    }
}
