//! API gateway
//!
//! Fronts the user, product and order services with prefix routing, bearer
//! authentication, per-client rate limiting, streaming reverse proxying and an
//! aggregated health endpoint.

pub mod config;
pub mod error;
pub mod gateway;
pub mod health;
pub mod http;
pub mod middleware;
pub mod proxy;
pub mod routes;
pub mod server;
