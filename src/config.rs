//! Gateway configuration.
//!
//! Values come from an optional YAML file (path in `GATEWAY_CONFIG`) and are
//! then overridden by environment variables. Every field has a default, so an
//! empty environment yields a working local setup.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

pub const USER_SERVICE: &str = "user-service";
pub const PRODUCT_SERVICE: &str = "product-service";
pub const ORDER_SERVICE: &str = "order-service";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub services: ServicesConfig,
    pub auth: AuthConfig,
    pub rate_limit: RateLimitConfig,
    pub proxy: ProxyConfig,
    pub health: HealthConfig,
    pub routes: Vec<RouteConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
}

/// Base URLs of the backends behind the gateway.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServicesConfig {
    pub user: String,
    pub product: String,
    pub order: String,
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Shared HMAC secret used to verify bearer tokens.
    pub jwt_secret: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Requests admitted per client per window.
    pub limit: u32,
    pub window_secs: u64,
    /// How often expired client buckets are swept.
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// Largest request body the gateway will buffer.
    pub max_body_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub timeout_secs: u64,
}

/// One prefix route, referring to a backend by service name.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct RouteConfig {
    pub prefix: String,
    pub service: String,
    #[serde(default)]
    pub require_auth: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            services: ServicesConfig::default(),
            auth: AuthConfig::default(),
            rate_limit: RateLimitConfig::default(),
            proxy: ProxyConfig::default(),
            health: HealthConfig::default(),
            routes: default_routes(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8000".to_string(),
        }
    }
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            user: "http://localhost:8001".to_string(),
            product: "http://localhost:8002".to_string(),
            order: "http://localhost:8003".to_string(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "your-secret-key-change-this-in-production".to_string(),
        }
    }
}

// Keeps the secret out of logs.
impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("jwt_secret", &"<redacted>")
            .finish()
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            limit: 100,
            window_secs: 60,
            sweep_interval_secs: 300,
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            connect_timeout_secs: 5,
            max_body_bytes: 10 * 1024 * 1024,
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self { timeout_secs: 5 }
    }
}

fn default_routes() -> Vec<RouteConfig> {
    let route = |prefix: &str, service: &str, require_auth: bool| RouteConfig {
        prefix: prefix.to_string(),
        service: service.to_string(),
        require_auth,
    };

    vec![
        // Login and registration are public.
        route("/api/users", USER_SERVICE, false),
        route("/api/profile", USER_SERVICE, true),
        route("/api/products", PRODUCT_SERVICE, false),
        route("/api/orders", ORDER_SERVICE, true),
    ]
}

impl ServicesConfig {
    /// Every backend as `(service name, base URL)`.
    pub fn entries(&self) -> Vec<(&'static str, &str)> {
        vec![
            (USER_SERVICE, self.user.as_str()),
            (PRODUCT_SERVICE, self.product.as_str()),
            (ORDER_SERVICE, self.order.as_str()),
        ]
    }

    pub fn url_for(&self, service: &str) -> Option<&str> {
        self.entries()
            .into_iter()
            .find(|(name, _)| *name == service)
            .map(|(_, url)| url)
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl ProxyConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl HealthConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Config {
    /// Loads configuration from the process environment.
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration using `lookup` in place of the environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match non_empty(&lookup, "GATEWAY_CONFIG") {
            Some(path) => {
                let raw = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read config file {path}"))?;
                Self::from_yaml_str(&raw)
                    .with_context(|| format!("Failed to parse config file {path}"))?
            }
            None => Self::default(),
        };

        config.apply_env(&lookup)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(raw)?)
    }

    fn apply_env<F>(&mut self, lookup: &F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = non_empty(lookup, "USER_SERVICE_URL") {
            self.services.user = url;
        }
        if let Some(url) = non_empty(lookup, "PRODUCT_SERVICE_URL") {
            self.services.product = url;
        }
        if let Some(url) = non_empty(lookup, "ORDER_SERVICE_URL") {
            self.services.order = url;
        }
        if let Some(secret) = non_empty(lookup, "JWT_SECRET") {
            self.auth.jwt_secret = secret;
        }

        if let Some(port) = non_empty(lookup, "GATEWAY_PORT") {
            let port: u16 = port.parse().context("GATEWAY_PORT must be a port number")?;
            let host = self
                .server
                .listen_addr
                .rsplit_once(':')
                .map(|(host, _)| host.to_string())
                .unwrap_or_else(|| "0.0.0.0".to_string());
            self.server.listen_addr = format!("{host}:{port}");
        }
        if let Some(addr) = non_empty(lookup, "LISTEN") {
            self.server.listen_addr = addr;
        }

        if let Some(limit) = non_empty(lookup, "RATE_LIMIT_REQUESTS") {
            self.rate_limit.limit = limit
                .parse()
                .context("RATE_LIMIT_REQUESTS must be an integer")?;
        }
        if let Some(window) = non_empty(lookup, "RATE_LIMIT_WINDOW_SECS") {
            self.rate_limit.window_secs = window
                .parse()
                .context("RATE_LIMIT_WINDOW_SECS must be an integer")?;
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        for (name, raw) in self.services.entries() {
            let url = url::Url::parse(raw).with_context(|| format!("Invalid URL for {name}: {raw}"))?;
            if url.scheme() != "http" {
                bail!("{name}: only http:// backends are supported, got {raw}");
            }
            if url.host_str().is_none() {
                bail!("{name}: backend URL has no host: {raw}");
            }
        }

        if self.rate_limit.limit == 0 {
            bail!("rate_limit.limit must be greater than zero");
        }
        if self.rate_limit.window_secs == 0 {
            bail!("rate_limit.window_secs must be greater than zero");
        }
        if self.rate_limit.sweep_interval_secs == 0 {
            bail!("rate_limit.sweep_interval_secs must be greater than zero");
        }
        if self.auth.jwt_secret.is_empty() {
            bail!("auth.jwt_secret must not be empty");
        }

        for route in &self.routes {
            if !route.prefix.starts_with('/') || route.prefix.len() < 2 || route.prefix.ends_with('/') {
                bail!(
                    "route prefix must start with '/' and not end with one: {}",
                    route.prefix
                );
            }
            if self.services.url_for(&route.service).is_none() {
                bail!(
                    "route {} refers to unknown service {}",
                    route.prefix,
                    route.service
                );
            }
        }

        Ok(())
    }
}

fn non_empty<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).filter(|v| !v.is_empty())
}
