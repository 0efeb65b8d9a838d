//! HTTP protocol implementation.
//!
//! This module implements the HTTP/1.1 server side of the gateway with support
//! for keep-alive connections.
//!
//! # Architecture
//!
//! - **`connection`**: The main connection handler implementing the request-response state machine
//! - **`parser`**: Parses incoming HTTP requests from byte buffers
//! - **`headers`**: Ordered, case-insensitive header list
//! - **`request`**: HTTP request representation and parsing utilities
//! - **`response`**: HTTP response representation with builder pattern
//! - **`writer`**: Serializes and writes HTTP responses to the client
//!
//! # Connection State Machine
//!
//! ```text
//!        ┌─────────────┐
//!        │   Reading   │ ← Wait for incoming request data
//!        └──────┬──────┘
//!               │ Request received
//!               ▼
//!        ┌──────────────────┐
//!        │   Processing     │ ← Run the gateway pipeline
//!        └──────┬───────────┘
//!               │
//!       ┌───────┴────────┐
//!       ▼                ▼
//!  ┌─────────┐     ┌───────────┐
//!  │ Writing │     │ Streaming │ ← Gateway response / backend response
//!  └────┬────┘     └─────┬─────┘
//!       └───────┬────────┘
//!               ├─ Keep-Alive → Reading (same connection)
//!               └─ Close → Closed
//! ```

pub mod connection;
pub mod headers;
pub mod parser;
pub mod request;
pub mod response;
pub mod writer;
