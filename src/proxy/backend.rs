//! Backend descriptors
//!
//! A backend is one independently running service, known to the gateway only
//! by its name and base URL. Descriptors are built once at startup and shared
//! read-only by routing, proxying and health checks.

use anyhow::{Context, Result};
use url::Url;

/// A named backend service reachable over plain HTTP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backend {
    /// Service name (e.g. "user-service")
    pub name: String,

    /// Base URL as configured, without a trailing slash
    pub url: String,

    host: String,
    port: u16,
    base_path: String,
}

impl Backend {
    /// Parses a backend from its configured base URL.
    pub fn new(name: impl Into<String>, url: &str) -> Result<Self> {
        let name = name.into();
        let parsed = Url::parse(url).with_context(|| format!("Invalid backend URL for {name}"))?;

        let host = parsed
            .host_str()
            .context("Backend URL missing host")?
            .to_string();
        let port = parsed.port_or_known_default().unwrap_or(80);
        let base_path = parsed.path().trim_end_matches('/').to_string();

        Ok(Self {
            name,
            url: url.trim_end_matches('/').to_string(),
            host,
            port,
            base_path,
        })
    }

    /// Get a display name for the backend
    pub fn display_name(&self) -> &str {
        &self.name
    }

    /// `host:port` to open a TCP connection to.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Value for the outbound `Host` header.
    pub fn authority(&self) -> String {
        if self.port == 80 {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Path prefix carried by the base URL itself (empty for most backends).
    pub fn base_path(&self) -> &str {
        &self.base_path
    }
}
