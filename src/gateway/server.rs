// src/gateway/server.rs
//! HTTP/JSON front door of the control plane
//!
//! One hyper HTTP/1 connection task per client. Handlers are thin: they parse,
//! call the supervisor, dispatcher or registry, and map errors through
//! [`error_response`].

use crate::fleet::dispatcher::Dispatcher;
use crate::fleet::registry::FleetRegistry;
use crate::fleet::supervisor::Supervisor;
use crate::gateway::response::{error_message, error_response, json_response, GatewayResponse};
use crate::model::{AgentId, Job};
use crate::utils::errors::Result;
use bytes::Bytes;
use http_body_util::{BodyExt, Limited};
use hyper::body::Incoming;
use hyper::header::HeaderValue;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};
use ulid::Ulid;

/// Request bodies above this size are rejected
pub const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

pub const REQUEST_ID_HEADER: &str = "x-request-id";
pub const AGENT_ID_HEADER: &str = "x-agent-id";

pub struct Gateway {
    registry: Arc<FleetRegistry>,
    supervisor: Arc<Supervisor>,
    dispatcher: Dispatcher,
}

impl Gateway {
    pub fn new(
        registry: Arc<FleetRegistry>,
        supervisor: Arc<Supervisor>,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            registry,
            supervisor,
            dispatcher,
        }
    }

    /// Accept connections until `shutdown` fires
    pub async fn serve(self: Arc<Self>, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        info!("Gateway listening on {}", listener.local_addr()?);

        loop {
            let (stream, peer) = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        continue;
                    }
                },
            };

            let gateway = Arc::clone(&self);
            tokio::spawn(async move {
                debug!(%peer, "Accepted connection");
                let io = TokioIo::new(stream);
                let service = service_fn(move |req| {
                    let gateway = Arc::clone(&gateway);
                    async move { Ok::<_, Infallible>(gateway.handle_request(req).await) }
                });

                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                    debug!(%peer, "Connection error: {}", e);
                }
            });
        }

        info!("Gateway stopped");
        Ok(())
    }

    async fn handle_request(&self, req: Request<Incoming>) -> GatewayResponse {
        let request_id = Ulid::new().to_string();
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let span = tracing::info_span!("request", %request_id, %method, %path);

        async move {
            let body = match Limited::new(req.into_body(), MAX_BODY_BYTES).collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(e) => {
                    warn!("Failed to read request body: {}", e);
                    return error_message(StatusCode::BAD_REQUEST, format!("unreadable body: {}", e));
                }
            };

            let mut response = self.route(&method, &path, body).await;
            debug!(status = response.status().as_u16(), "Request handled");
            if let Ok(value) = HeaderValue::from_str(&request_id) {
                response.headers_mut().insert(REQUEST_ID_HEADER, value);
            }
            response
        }
        .instrument(span)
        .await
    }

    pub(crate) async fn route(&self, method: &Method, path: &str, body: Bytes) -> GatewayResponse {
        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();

        match (method, segments.as_slice()) {
            (&Method::GET, ["health"]) => self.health().await,
            (&Method::GET, ["agents"]) => self.list_agents().await,
            (&Method::POST, ["agents"]) => self.spawn_agent().await,
            (&Method::DELETE, ["agents", id]) => self.kill_agent(id).await,
            (&Method::POST, ["render"]) => self.render(&body).await,
            (_, ["health"]) | (_, ["agents"]) | (_, ["agents", _]) | (_, ["render"]) => {
                error_message(StatusCode::METHOD_NOT_ALLOWED, format!("{} not allowed on {}", method, path))
            }
            _ => error_message(StatusCode::NOT_FOUND, format!("no route for {}", path)),
        }
    }

    async fn health(&self) -> GatewayResponse {
        json_response(
            StatusCode::OK,
            &json!({ "status": "ok", "agents": self.registry.len().await }),
        )
    }

    async fn list_agents(&self) -> GatewayResponse {
        let agents = self.registry.snapshot().await;
        let processes = self.supervisor.processes().await;
        json_response(
            StatusCode::OK,
            &json!({ "agents": agents, "processes": processes }),
        )
    }

    async fn spawn_agent(&self) -> GatewayResponse {
        match self.supervisor.spawn().await {
            Ok(spawned) => json_response(
                StatusCode::CREATED,
                &json!({
                    "agent_id": spawned.agent_id,
                    "port": spawned.port,
                    "message": format!("{} spawned on port {}", spawned.agent_id, spawned.port),
                }),
            ),
            Err(e) => {
                error!("Spawn failed: {}", e);
                error_response(&e)
            }
        }
    }

    async fn kill_agent(&self, raw_id: &str) -> GatewayResponse {
        let Ok(agent_id) = raw_id.parse::<AgentId>() else {
            return error_message(StatusCode::BAD_REQUEST, format!("invalid agent id '{}'", raw_id));
        };

        match self.supervisor.kill(agent_id).await {
            Ok(termination) => json_response(StatusCode::OK, &termination),
            Err(e) => error_response(&e),
        }
    }

    async fn render(&self, body: &[u8]) -> GatewayResponse {
        let job: Job = match serde_json::from_slice(body) {
            Ok(job) => job,
            Err(e) => return error_message(StatusCode::BAD_REQUEST, format!("invalid job: {}", e)),
        };
        if job.url.trim().is_empty() {
            return error_message(StatusCode::BAD_REQUEST, "job url must not be empty");
        }

        match self.dispatcher.dispatch(job).await {
            Ok((agent_id, result)) => {
                let mut response = json_response(StatusCode::OK, &result);
                if let Ok(value) = HeaderValue::from_str(&agent_id.to_string()) {
                    response.headers_mut().insert(AGENT_ID_HEADER, value);
                }
                response
            }
            Err(e) => error_response(&e),
        }
    }
}
