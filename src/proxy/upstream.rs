//! Upstream connection and request forwarding
//!
//! This module builds the request sent to a backend, performs the exchange
//! over a fresh TCP connection and hands back the response head together
//! with the still-open connection so the body can be streamed to the client.
//!
//! Requests go out as HTTP/1.0. The backend therefore closes the connection
//! after answering and never uses chunked framing, which keeps body
//! forwarding a plain byte copy.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::{Buf, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{Instant, timeout, timeout_at};

use crate::error::{GatewayError, SERVICE_NAME};
use crate::gateway::RequestContext;
use crate::http::headers::Headers;
use crate::http::request::{Method, Request};
use crate::http::response::StatusCode;
use crate::middleware::auth::{HEADER_EMAIL, HEADER_USER_ID, HEADER_USERNAME, IDENTITY_HEADERS, Identity};
use crate::proxy::backend::Backend;
use crate::routes::Route;

/// Default buffer size for streaming
const BUFFER_SIZE: usize = 8192;

/// Largest response head accepted from a backend.
const MAX_RESPONSE_HEAD: usize = 64 * 1024;

/// Connection-scoped headers that never cross the proxy hop.
pub const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "Connection",
    "Keep-Alive",
    "Proxy-Authenticate",
    "Proxy-Authorization",
    "TE",
    "Trailers",
    "Transfer-Encoding",
    "Upgrade",
];

/// Marker header added to every forwarded request.
pub const HEADER_GATEWAY: &str = "X-Gateway";

/// A request ready to be written to a backend.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub backend: Arc<Backend>,
    /// Full URL, for logging and error reports.
    pub target_url: String,
    /// Path and query placed on the request line.
    pub request_target: String,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl OutboundRequest {
    /// A bodiless GET for `path` on `backend`.
    pub fn get(backend: Arc<Backend>, path: &str) -> Self {
        let mut headers = Headers::new();
        headers.insert("Host", backend.authority());
        headers.insert(HEADER_GATEWAY, SERVICE_NAME);

        Self {
            method: Method::GET,
            target_url: format!("{}{}", backend.url, path),
            request_target: format!("{}{}", backend.base_path(), path),
            backend,
            headers,
            body: Vec::new(),
        }
    }

    /// Serializes the request for the wire.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(512 + self.body.len());

        buffer.extend_from_slice(
            format!("{} {} HTTP/1.0\r\n", self.method.as_str(), self.request_target).as_bytes(),
        );

        for (key, value) in self.headers.iter() {
            buffer.extend_from_slice(format!("{}: {}\r\n", key, value).as_bytes());
        }

        buffer.extend_from_slice(b"\r\n");
        buffer.extend_from_slice(&self.body);
        buffer
    }
}

/// Path sent to the backend: `path` with the route prefix removed, always
/// starting with `/`.
pub fn strip_route_prefix(prefix: &str, path: &str) -> String {
    let rest = path.strip_prefix(prefix).unwrap_or(path);
    if rest.starts_with('/') {
        rest.to_string()
    } else {
        format!("/{rest}")
    }
}

/// Target URL for `request` on `route`: prefix stripped, query kept verbatim.
pub fn build_target_url(route: &Route, request: &Request) -> String {
    let mut url = format!(
        "{}{}",
        route.backend.url,
        strip_route_prefix(&route.prefix, request.uri_path())
    );
    if let Some(query) = request.query() {
        url.push('?');
        url.push_str(query);
    }
    url
}

fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|hop| hop.eq_ignore_ascii_case(name))
}

fn is_gateway_owned(name: &str) -> bool {
    name.eq_ignore_ascii_case("Host")
        || name.eq_ignore_ascii_case("Content-Length")
        || IDENTITY_HEADERS.iter().any(|h| h.eq_ignore_ascii_case(name))
}

/// Builds the outbound request for `request` on `route`.
///
/// Client headers are copied except hop-by-hop ones and those the gateway
/// owns (`Host`, `Content-Length` and the identity headers). Identity and
/// forwarding headers are then set from trusted sources only.
pub fn build_outbound_request(
    route: &Route,
    request: &Request,
    ctx: &RequestContext,
    identity: Option<&Identity>,
) -> Result<OutboundRequest, GatewayError> {
    let backend = Arc::clone(&route.backend);

    let mut request_target = format!(
        "{}{}",
        backend.base_path(),
        strip_route_prefix(&route.prefix, request.uri_path())
    );
    if let Some(query) = request.query() {
        request_target.push('?');
        request_target.push_str(query);
    }

    let mut headers: Headers = request
        .headers
        .iter()
        .filter(|(name, _)| !is_hop_by_hop(name) && !is_gateway_owned(name))
        .collect();

    headers.insert("Host", backend.authority());
    if !request.body.is_empty() || request.header("Content-Length").is_some() {
        headers.insert("Content-Length", request.body.len().to_string());
    }

    if let Some(identity) = identity {
        headers.insert(HEADER_USER_ID, identity.subject_id.to_string());
        headers.insert(HEADER_USERNAME, identity.username.as_str());
        headers.insert(HEADER_EMAIL, identity.email.as_str());
    }

    let proto = if ctx.secure {
        "https".to_string()
    } else {
        request
            .header("X-Forwarded-Proto")
            .filter(|v| !v.is_empty())
            .unwrap_or("http")
            .to_string()
    };

    headers.insert("X-Forwarded-For", ctx.client_addr.ip().to_string());
    headers.insert("X-Forwarded-Proto", proto);
    if let Some(host) = request.header("Host") {
        headers.insert("X-Forwarded-Host", host);
    }
    headers.insert(HEADER_GATEWAY, SERVICE_NAME);

    for (name, value) in headers.iter() {
        if value.contains(['\r', '\n']) {
            return Err(GatewayError::ProxyConstruction(format!(
                "invalid value for header {name}"
            )));
        }
    }

    Ok(OutboundRequest {
        method: request.method.clone(),
        target_url: build_target_url(route, request),
        request_target,
        backend,
        headers,
        body: request.body.clone(),
    })
}

/// How the end of a backend response body is recognised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    Empty,
    Length(u64),
    UntilClose,
}

/// A backend response whose body has not been read yet.
#[derive(Debug)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: Headers,
    pub framing: BodyFraming,
    stream: TcpStream,
    buffered: BytesMut,
    deadline: Instant,
}

impl UpstreamResponse {
    /// Whether the client connection can be reused once this body is sent.
    pub fn reusable_framing(&self) -> bool {
        let closes = self
            .headers
            .get_all("Connection")
            .any(|v| v.eq_ignore_ascii_case("close"));
        !closes && self.framing != BodyFraming::UntilClose
    }

    /// Drops the backend's connection-scoped headers. `Transfer-Encoding`
    /// stays because the body is relayed with its original framing.
    pub fn strip_hop_by_hop(&mut self) {
        for name in HOP_BY_HOP_HEADERS {
            if !name.eq_ignore_ascii_case("Transfer-Encoding") {
                self.headers.remove(name);
            }
        }
    }

    /// Copies the body to `client` byte for byte. Returns the number of
    /// bytes written.
    ///
    /// Fails if the backend stalls past the request deadline, closes early
    /// or the client goes away. The response head is already on the wire by
    /// then, so callers can only log and drop the connection.
    pub async fn stream_body<W>(mut self, client: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let deadline = self.deadline;
        timeout_at(deadline, self.copy_body(client))
            .await
            .context("Backend response body timed out")?
    }

    async fn copy_body<W>(&mut self, client: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let mut remaining = match self.framing {
            BodyFraming::Empty => return Ok(0),
            BodyFraming::Length(n) => Some(n),
            BodyFraming::UntilClose => None,
        };
        let mut written = 0u64;

        if !self.buffered.is_empty() {
            let take = match remaining {
                Some(n) => (n as usize).min(self.buffered.len()),
                None => self.buffered.len(),
            };
            client.write_all(&self.buffered[..take]).await?;
            self.buffered.advance(take);
            written += take as u64;
            if let Some(n) = remaining.as_mut() {
                *n -= take as u64;
            }
        }

        let mut chunk = vec![0u8; BUFFER_SIZE];
        loop {
            let want = match remaining {
                Some(0) => break,
                Some(n) => (n as usize).min(BUFFER_SIZE),
                None => BUFFER_SIZE,
            };

            let n = self.stream.read(&mut chunk[..want]).await?;
            if n == 0 {
                if remaining.is_some() {
                    anyhow::bail!("Backend closed connection before complete body was sent");
                }
                break;
            }

            client.write_all(&chunk[..n]).await?;
            written += n as u64;
            if let Some(r) = remaining.as_mut() {
                *r -= n as u64;
            }
        }

        client.flush().await?;
        Ok(written)
    }
}

/// Opens one connection per request and enforces the exchange deadline.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl UpstreamClient {
    pub fn new(connect_timeout: Duration, request_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            request_timeout,
        }
    }

    /// Sends `request` and reads the response head.
    ///
    /// The request timeout bounds the whole exchange, body streaming
    /// included; the connect timeout additionally bounds the TCP handshake.
    pub async fn send(&self, request: &OutboundRequest) -> Result<UpstreamResponse> {
        let deadline = Instant::now() + self.request_timeout;
        let addr = request.backend.socket_addr();

        let connect = timeout(self.connect_timeout, TcpStream::connect(&addr));
        let stream = timeout_at(deadline, connect)
            .await
            .context("Connection timeout")?
            .context("Connection timeout")?
            .with_context(|| format!("Failed to connect to {addr}"))?;

        tracing::trace!(backend = request.backend.display_name(), "Connected to backend");

        timeout_at(deadline, Self::exchange(stream, request, deadline))
            .await
            .context("Request timeout")?
    }

    async fn exchange(
        mut stream: TcpStream,
        request: &OutboundRequest,
        deadline: Instant,
    ) -> Result<UpstreamResponse> {
        stream.write_all(&request.to_bytes()).await?;
        stream.flush().await?;

        let mut buffer = BytesMut::with_capacity(BUFFER_SIZE);
        loop {
            let n = stream.read_buf(&mut buffer).await?;

            if let Some(headers_end) = buffer.windows(4).position(|w| w == b"\r\n\r\n") {
                let head = buffer.split_to(headers_end + 4);
                let (status, headers) = parse_response_head(&head)?;
                let framing = body_framing(&request.method, status, &headers);

                return Ok(UpstreamResponse {
                    status,
                    headers,
                    framing,
                    stream,
                    buffered: buffer,
                    deadline,
                });
            }

            if n == 0 {
                anyhow::bail!("Connection closed before complete response received");
            }

            if buffer.len() > MAX_RESPONSE_HEAD {
                anyhow::bail!("Response headers too large");
            }
        }
    }
}

/// Parses a status line and header block.
pub fn parse_response_head(head: &[u8]) -> Result<(StatusCode, Headers)> {
    let text = std::str::from_utf8(head).context("Invalid UTF-8 in response headers")?;
    let mut lines = text.split("\r\n");

    let status_line = lines.next().context("Empty response")?;
    let mut parts = status_line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/") {
        anyhow::bail!("Invalid status line: {}", status_line);
    }

    let code: u16 = parts
        .next()
        .context("Missing status code")?
        .parse()
        .context("Invalid status code")?;
    let status = StatusCode::from_u16(code).context("Status code out of range")?;

    let mut headers = Headers::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        if let Some((key, value)) = line.split_once(':') {
            headers.append(key.trim(), value.trim());
        }
    }

    Ok((status, headers))
}

fn body_framing(method: &Method, status: StatusCode, headers: &Headers) -> BodyFraming {
    if *method == Method::HEAD || status.is_bodiless() {
        return BodyFraming::Empty;
    }
    if headers.contains("Transfer-Encoding") {
        return BodyFraming::UntilClose;
    }
    match headers
        .get("Content-Length")
        .and_then(|v| v.trim().parse::<u64>().ok())
    {
        Some(0) => BodyFraming::Empty,
        Some(n) => BodyFraming::Length(n),
        None => BodyFraming::UntilClose,
    }
}

/// Forwards requests to the backend chosen by the route table.
///
/// Each request gets exactly one attempt; a failed exchange becomes a 502
/// naming the backend.
pub struct ProxyHandler {
    client: UpstreamClient,
}

impl ProxyHandler {
    pub fn new(client: UpstreamClient) -> Self {
        Self { client }
    }

    pub async fn forward(
        &self,
        route: &Route,
        request: &Request,
        ctx: &RequestContext,
        identity: Option<&Identity>,
    ) -> Result<UpstreamResponse, GatewayError> {
        let outbound = build_outbound_request(route, request, ctx, identity)?;

        tracing::debug!(
            backend = route.backend.display_name(),
            method = request.method.as_str(),
            target = %outbound.target_url,
            "Forwarding request to backend"
        );

        match self.client.send(&outbound).await {
            Ok(response) => {
                tracing::info!(
                    backend = route.backend.display_name(),
                    status = response.status.as_u16(),
                    method = request.method.as_str(),
                    path = %request.path,
                    client = %ctx.client_addr,
                    "Request forwarded"
                );
                Ok(response)
            }
            Err(e) => {
                tracing::error!(
                    backend = route.backend.display_name(),
                    error = %format!("{e:#}"),
                    method = request.method.as_str(),
                    path = %request.path,
                    "Failed to proxy request to backend"
                );
                Err(GatewayError::UpstreamUnavailable {
                    message: format!("{e:#}"),
                    target: route.backend.url.clone(),
                })
            }
        }
    }
}
