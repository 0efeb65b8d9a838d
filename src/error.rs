//! Client-visible failures.
//!
//! Every rejection the gateway produces is terminal: the request is not
//! forwarded and the caller receives a JSON body naming the gateway in a
//! `service` field. Status codes a backend returns are never mapped through
//! this type; they reach the client unchanged.

use serde_json::{Map, Value, json};

use crate::http::response::{Response, StatusCode};

/// Value of the `service` field in every error body.
pub const SERVICE_NAME: &str = "api-gateway";

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Authorization header present but not in `Bearer <token>` form.
    #[error("{0}")]
    BadRequest(String),

    /// Missing, invalid or expired credentials.
    #[error("{0}")]
    Unauthenticated(String),

    #[error("Rate limit exceeded")]
    RateLimited {
        limit: u32,
        window: String,
        reset_time: i64,
    },

    #[error("Route not found")]
    RouteNotFound { path: String },

    #[error("Request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    /// The inbound bytes were not a request the gateway can handle.
    #[error("{message}")]
    MalformedRequest { status: StatusCode, message: String },

    /// Building the outbound request failed locally.
    #[error("Failed to create proxy request: {0}")]
    ProxyConstruction(String),

    /// Connecting to or exchanging with the backend failed.
    #[error("Backend service unavailable: {message}")]
    UpstreamUnavailable { message: String, target: String },
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::BadRequest(_) | GatewayError::Unauthenticated(_) => {
                StatusCode::UNAUTHORIZED
            }
            GatewayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::RouteNotFound { .. } => StatusCode::NOT_FOUND,
            GatewayError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::MalformedRequest { status, .. } => *status,
            GatewayError::ProxyConstruction(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::UpstreamUnavailable { .. } => StatusCode::BAD_GATEWAY,
        }
    }

    /// The JSON body sent to the client.
    pub fn body(&self) -> Value {
        let mut body = Map::new();
        body.insert("error".into(), Value::String(self.to_string()));

        match self {
            GatewayError::RateLimited {
                limit,
                window,
                reset_time,
            } => {
                body.insert("limit".into(), json!(limit));
                body.insert("window".into(), json!(window));
                body.insert("reset_time".into(), json!(reset_time));
            }
            GatewayError::RouteNotFound { path } => {
                body.insert("path".into(), json!(path));
            }
            GatewayError::UpstreamUnavailable { target, .. } => {
                body.insert("target".into(), json!(target));
            }
            _ => {}
        }

        body.insert("service".into(), json!(SERVICE_NAME));
        Value::Object(body)
    }

    pub fn into_response(self) -> Response {
        Response::json(self.status(), &self.body())
    }
}
