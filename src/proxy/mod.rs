//! Reverse proxy functionality
//!
//! Backend descriptors and the request forwarding engine.

pub mod backend;
pub mod upstream;

pub use backend::Backend;
pub use upstream::{OutboundRequest, ProxyHandler, UpstreamClient, UpstreamResponse};
