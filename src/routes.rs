//! Static prefix routing.
//!
//! The table is built once from configuration and only read afterwards, so it
//! is shared between connections without locking.

use std::sync::Arc;

use anyhow::{Result, bail};
use serde::Serialize;

use crate::config::Config;
use crate::proxy::backend::Backend;

/// A path prefix bound to a backend.
#[derive(Debug, Clone)]
pub struct Route {
    pub prefix: String,
    pub backend: Arc<Backend>,
    pub require_auth: bool,
}

/// Route summary exposed by the info endpoint.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RouteInfo {
    pub prefix: String,
    pub service: String,
    pub auth: bool,
}

impl Route {
    /// Whether `path` falls under this route's prefix.
    ///
    /// Matches on a segment boundary: `/api/users` covers `/api/users` and
    /// `/api/users/42` but not `/api/usersettings`.
    pub fn matches(&self, path: &str) -> bool {
        match path.strip_prefix(self.prefix.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }
}

/// Whether `path` contains a `.` or `..` segment, plain or percent-encoded.
///
/// Such paths could climb out of the stripped prefix on the backend, so they
/// are refused before route lookup.
pub fn has_dot_segments(path: &str) -> bool {
    path.split('/').any(|segment| {
        let decoded = segment.to_ascii_lowercase().replace("%2e", ".");
        decoded == "." || decoded == ".."
    })
}

#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
    backends: Vec<Arc<Backend>>,
}

impl RouteTable {
    /// Builds the table from configuration.
    ///
    /// Routes are ordered longest prefix first so a more specific prefix wins
    /// over one it extends.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut backends = Vec::new();
        for (name, url) in config.services.entries() {
            backends.push(Arc::new(Backend::new(name, url)?));
        }

        let mut routes = Vec::with_capacity(config.routes.len());
        for route in &config.routes {
            let Some(backend) = backends.iter().find(|b| b.name == route.service) else {
                bail!("route {} refers to unknown service {}", route.prefix, route.service);
            };
            if routes.iter().any(|r: &Route| r.prefix == route.prefix) {
                bail!("duplicate route prefix {}", route.prefix);
            }
            routes.push(Route {
                prefix: route.prefix.clone(),
                backend: Arc::clone(backend),
                require_auth: route.require_auth,
            });
        }

        Ok(Self::new(routes, backends))
    }

    pub fn new(mut routes: Vec<Route>, backends: Vec<Arc<Backend>>) -> Self {
        // Stable sort keeps configuration order among equal lengths.
        routes.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
        Self { routes, backends }
    }

    /// Finds the route serving `path` (query string already removed).
    pub fn resolve(&self, path: &str) -> Option<&Route> {
        self.routes.iter().find(|route| route.matches(path))
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Every configured backend, whether or not a route points at it.
    pub fn backends(&self) -> &[Arc<Backend>] {
        &self.backends
    }

    pub fn describe(&self) -> Vec<RouteInfo> {
        self.routes
            .iter()
            .map(|route| RouteInfo {
                prefix: route.prefix.clone(),
                service: route.backend.name.clone(),
                auth: route.require_auth,
            })
            .collect()
    }
}
