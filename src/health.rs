//! Backend health aggregation.
//!
//! Every configured backend is checked with `GET {base}/health` in parallel,
//! each check under its own short timeout. The gateway reports healthy only
//! when every backend answered 200.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;

use crate::http::response::{Response, StatusCode};
use crate::proxy::backend::Backend;
use crate::proxy::upstream::{OutboundRequest, UpstreamClient};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Outcome of probing one backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ServiceHealth {
    /// Answered 200.
    Up { url: String },
    /// Connection failed or timed out.
    Down { error: String },
    /// Answered with anything other than 200.
    Unhealthy { code: u16 },
}

impl ServiceHealth {
    pub fn is_up(&self) -> bool {
        matches!(self, ServiceHealth::Up { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct GatewayHealth {
    pub status: OverallStatus,
    pub timestamp: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub gateway: GatewayHealth,
    pub services: BTreeMap<String, ServiceHealth>,
}

impl HealthReport {
    pub fn from_services(services: BTreeMap<String, ServiceHealth>) -> Self {
        let status = if services.values().all(ServiceHealth::is_up) {
            OverallStatus::Healthy
        } else {
            OverallStatus::Unhealthy
        };

        Self {
            gateway: GatewayHealth {
                status,
                timestamp: Utc::now().format(TIMESTAMP_FORMAT).to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            services,
        }
    }

    pub fn http_status(&self) -> StatusCode {
        match self.gateway.status {
            OverallStatus::Healthy => StatusCode::OK,
            OverallStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn into_response(self) -> Response {
        Response::json(self.http_status(), &self)
    }
}

pub struct HealthChecker {
    client: UpstreamClient,
}

impl HealthChecker {
    /// `check_timeout` bounds each check from connect to response head.
    pub fn new(check_timeout: Duration) -> Self {
        Self {
            client: UpstreamClient::new(check_timeout, check_timeout),
        }
    }

    pub async fn check_all(&self, backends: &[Arc<Backend>]) -> HealthReport {
        let checks: Vec<_> = backends
            .iter()
            .map(|backend| {
                let client = self.client.clone();
                let backend = Arc::clone(backend);
                let name = backend.name.clone();
                (name, tokio::spawn(async move { check_backend(&client, backend).await }))
            })
            .collect();

        let mut services = BTreeMap::new();
        for (name, handle) in checks {
            let health = handle.await.unwrap_or_else(|e| ServiceHealth::Down {
                error: format!("health check failed: {e}"),
            });
            services.insert(name, health);
        }

        let report = HealthReport::from_services(services);
        if report.gateway.status == OverallStatus::Unhealthy {
            tracing::warn!(services = ?report.services, "One or more backends are not healthy");
        }
        report
    }
}

async fn check_backend(client: &UpstreamClient, backend: Arc<Backend>) -> ServiceHealth {
    let request = OutboundRequest::get(Arc::clone(&backend), "/health");

    match client.send(&request).await {
        Ok(response) if response.status == StatusCode::OK => ServiceHealth::Up {
            url: backend.url.clone(),
        },
        Ok(response) => ServiceHealth::Unhealthy {
            code: response.status.as_u16(),
        },
        Err(e) => {
            tracing::debug!(backend = backend.display_name(), error = %format!("{e:#}"), "Health check failed");
            ServiceHealth::Down {
                error: format!("{e:#}"),
            }
        }
    }
}
