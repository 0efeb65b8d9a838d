//! Per-request pipeline.
//!
//! Order of checks for every inbound request:
//!
//! ```text
//! rate limit ─▶ CORS preflight ─▶ info / health ─▶ route lookup ─▶ auth (if required) ─▶ proxy
//! ```
//!
//! Each step either passes the request on or produces the final response.
//! Nothing is forwarded after a rejection and nothing is retried.

use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use crate::config::Config;
use crate::error::{GatewayError, SERVICE_NAME};
use crate::health::{HealthChecker, HealthReport, TIMESTAMP_FORMAT};
use crate::http::request::{Method, Request};
use crate::http::response::{Response, StatusCode};
use crate::middleware::rate_limit::format_window;
use crate::middleware::{Admission, AuthGate, RateLimiter, cors};
use crate::proxy::upstream::{ProxyHandler, UpstreamClient, UpstreamResponse};
use crate::routes::{RouteInfo, RouteTable, has_dot_segments};

/// Facts about the client connection a request arrived on.
#[derive(Debug, Clone, Copy)]
pub struct RequestContext {
    pub client_addr: SocketAddr,
    /// Whether the client connection is TLS-terminated at the gateway.
    pub secure: bool,
}

impl RequestContext {
    pub fn new(client_addr: SocketAddr) -> Self {
        Self {
            client_addr,
            secure: false,
        }
    }

    /// Key the rate limiter counts against.
    pub fn client_key(&self) -> String {
        self.client_addr.ip().to_string()
    }
}

/// What to send back for one request.
#[derive(Debug)]
pub enum Reply {
    /// A response produced by the gateway itself.
    Local(Response),
    /// A backend response whose body still has to be streamed.
    Proxied(UpstreamResponse),
}

#[derive(Serialize)]
struct GatewayInfo<'a> {
    service: &'a str,
    version: &'a str,
    timestamp: String,
    routes: Vec<RouteInfo>,
}

pub struct Gateway {
    routes: RouteTable,
    auth: AuthGate,
    limiter: Arc<RateLimiter>,
    proxy: ProxyHandler,
    health: HealthChecker,
    max_body_bytes: usize,
}

impl Gateway {
    /// Builds the gateway and starts the rate limiter's sweep task.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let routes = RouteTable::from_config(config)?;
        let limiter = RateLimiter::start(&config.rate_limit);
        Ok(Self::new(config, routes, limiter))
    }

    pub fn new(config: &Config, routes: RouteTable, limiter: Arc<RateLimiter>) -> Self {
        let client = UpstreamClient::new(
            config.proxy.connect_timeout(),
            config.proxy.request_timeout(),
        );

        Self {
            routes,
            auth: AuthGate::new(&config.auth.jwt_secret),
            limiter,
            proxy: ProxyHandler::new(client),
            health: HealthChecker::new(config.health.timeout()),
            max_body_bytes: config.proxy.max_body_bytes,
        }
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub fn max_body_bytes(&self) -> usize {
        self.max_body_bytes
    }

    /// Runs one request through the pipeline.
    pub async fn handle(&self, request: &Request, ctx: &RequestContext) -> Reply {
        if let Admission::Rejected {
            reset_at,
            limit,
            window,
        } = self.limiter.admit(&ctx.client_key()).await
        {
            tracing::warn!(client = %ctx.client_addr, path = %request.path, "Rate limit exceeded");
            return Reply::Local(
                GatewayError::RateLimited {
                    limit,
                    window: format_window(window),
                    reset_time: reset_at,
                }
                .into_response(),
            );
        }

        if request.method == Method::OPTIONS {
            return Reply::Local(cors::preflight());
        }

        let mut reply = match self.dispatch(request, ctx).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(
                    client = %ctx.client_addr,
                    method = request.method.as_str(),
                    path = %request.path,
                    status = e.status().as_u16(),
                    error = %e,
                    "Request rejected"
                );
                Reply::Local(e.into_response())
            }
        };

        match &mut reply {
            Reply::Local(response) => cors::apply(&mut response.headers),
            Reply::Proxied(upstream) => cors::apply(&mut upstream.headers),
        }
        reply
    }

    async fn dispatch(&self, request: &Request, ctx: &RequestContext) -> Result<Reply, GatewayError> {
        let path = request.uri_path();

        if request.method == Method::GET {
            match path {
                "/" => return Ok(Reply::Local(self.info())),
                "/health" => return Ok(Reply::Local(self.check_health().await.into_response())),
                _ => {}
            }
        }

        if has_dot_segments(path) {
            return Err(GatewayError::MalformedRequest {
                status: StatusCode::BAD_REQUEST,
                message: "Invalid request path".to_string(),
            });
        }

        let route = self
            .routes
            .resolve(path)
            .ok_or_else(|| GatewayError::RouteNotFound {
                path: path.to_string(),
            })?;

        let identity = if route.require_auth {
            Some(self.auth.authenticate(&request.headers)?)
        } else {
            None
        };

        let upstream = self
            .proxy
            .forward(route, request, ctx, identity.as_ref())
            .await?;
        Ok(Reply::Proxied(upstream))
    }

    pub async fn check_health(&self) -> HealthReport {
        self.health.check_all(self.routes.backends()).await
    }

    fn info(&self) -> Response {
        let info = GatewayInfo {
            service: SERVICE_NAME,
            version: env!("CARGO_PKG_VERSION"),
            timestamp: Utc::now().format(TIMESTAMP_FORMAT).to_string(),
            routes: self.routes.describe(),
        };
        Response::json(StatusCode::OK, &info)
    }

    /// Stops background work owned by the gateway.
    pub async fn shutdown(&self) {
        self.limiter.shutdown().await;
    }
}
