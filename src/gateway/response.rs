// src/gateway/response.rs
//! JSON response helpers and the error-to-status mapping

use crate::utils::errors::FleetError;
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderValue, CONTENT_TYPE, RETRY_AFTER};
use hyper::{Response, StatusCode};
use serde::Serialize;
use serde_json::json;

pub type GatewayResponse = Response<Full<Bytes>>;

/// Seconds a client should wait after a capacity or shutdown rejection
pub const RETRY_AFTER_SECS: u64 = 1;

pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> GatewayResponse {
    let (status, bytes) = match serde_json::to_vec(body) {
        Ok(bytes) => (status, Bytes::from(bytes)),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Bytes::from(format!(r#"{{"error":"serialization failed: {}"}}"#, e)),
        ),
    };

    let mut response = Response::new(Full::new(bytes));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

pub fn error_message(status: StatusCode, message: impl Into<String>) -> GatewayResponse {
    json_response(status, &json!({ "error": message.into() }))
}

/// Map a dispatch or supervisor failure to an HTTP response
pub fn error_response(err: &FleetError) -> GatewayResponse {
    let status = match err {
        FleetError::NoHealthyAgent => StatusCode::SERVICE_UNAVAILABLE,
        FleetError::CapacityExceeded(_) | FleetError::ShuttingDown => StatusCode::TOO_MANY_REQUESTS,
        FleetError::AgentNotFound(_) => StatusCode::NOT_FOUND,
        FleetError::RegistrationTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        FleetError::Rpc(_) | FleetError::Transport(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    let mut response = error_message(status, err.to_string());
    if err.is_retryable() {
        response
            .headers_mut()
            .insert(RETRY_AFTER, HeaderValue::from(RETRY_AFTER_SECS));
    }
    response
}
