//! Admission checks run before a request is forwarded
//!
//! Rate limiting applies to every request, CORS headers to every response
//! that passes the limiter, and bearer authentication to routes that ask
//! for it.

pub mod auth;
pub mod cors;
pub mod rate_limit;

pub use auth::{AuthError, AuthGate, Identity};
pub use rate_limit::{Admission, RateLimiter};
