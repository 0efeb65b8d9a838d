use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};

use crate::error::GatewayError;
use crate::gateway::{Gateway, Reply, RequestContext};
use crate::http::parser::{ParseError, parse_http_request};
use crate::http::request::Request;
use crate::http::response::StatusCode;
use crate::http::writer::ResponseWriter;
use crate::proxy::upstream::UpstreamResponse;

pub struct Connection<S> {
    stream: S,
    ctx: RequestContext,
    gateway: Arc<Gateway>,
    buffer: Vec<u8>,
    state: ConnectionState,
}

pub enum ConnectionState {
    Reading,
    Processing(Request),
    Writing(ResponseWriter, bool), // bool = keep_alive?
    Streaming(UpstreamResponse, bool),
    Closed,
}

enum Incoming {
    Request(Request),
    Rejected(GatewayError),
    Closed,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, peer: SocketAddr, gateway: Arc<Gateway>) -> Self {
        Self {
            stream,
            ctx: RequestContext::new(peer),
            gateway,
            buffer: Vec::with_capacity(4096),
            state: ConnectionState::Reading,
        }
    }

    pub async fn run(&mut self) -> anyhow::Result<()> {
        loop {
            match std::mem::replace(&mut self.state, ConnectionState::Closed) {
                ConnectionState::Reading => {
                    self.state = match self.read_request().await? {
                        Incoming::Request(req) => ConnectionState::Processing(req),
                        Incoming::Rejected(err) => {
                            tracing::warn!(client = %self.ctx.client_addr, error = %err, "Rejected unreadable request");
                            let mut response = err.into_response();
                            response.headers.insert("Connection", "close");
                            ConnectionState::Writing(ResponseWriter::new(&response), false)
                        }
                        Incoming::Closed => ConnectionState::Closed,
                    };
                }

                ConnectionState::Processing(req) => {
                    let keep_alive = req.keep_alive();

                    self.state = match self.gateway.handle(&req, &self.ctx).await {
                        Reply::Local(mut response) => {
                            if !keep_alive {
                                response.headers.insert("Connection", "close");
                            }
                            ConnectionState::Writing(ResponseWriter::new(&response), keep_alive)
                        }
                        Reply::Proxied(mut upstream) => {
                            let keep_alive = keep_alive && upstream.reusable_framing();
                            upstream.strip_hop_by_hop();
                            if !keep_alive {
                                upstream.headers.insert("Connection", "close");
                            }
                            ConnectionState::Streaming(upstream, keep_alive)
                        }
                    };
                }

                ConnectionState::Writing(mut writer, keep_alive) => {
                    writer.write_to_stream(&mut self.stream).await?;

                    if keep_alive {
                        self.state = ConnectionState::Reading; // go back for next request
                    }
                }

                ConnectionState::Streaming(upstream, keep_alive) => {
                    ResponseWriter::head(upstream.status, &upstream.headers)
                        .write_to_stream(&mut self.stream)
                        .await?;

                    // Status and headers are committed; a failure here can
                    // only end the connection.
                    match upstream.stream_body(&mut self.stream).await {
                        Ok(bytes) => {
                            tracing::trace!(bytes, "Streamed backend response body");
                            if keep_alive {
                                self.state = ConnectionState::Reading;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(
                                client = %self.ctx.client_addr,
                                error = %format!("{e:#}"),
                                "Aborted streaming backend response"
                            );
                        }
                    }
                }

                ConnectionState::Closed => {
                    break;
                }
            }
        }

        Ok(())
    }

    async fn read_request(&mut self) -> anyhow::Result<Incoming> {
        let max_body = self.gateway.max_body_bytes();

        loop {
            // Try parsing whatever we already have
            match parse_http_request(&self.buffer, max_body) {
                Ok((request, consumed)) => {
                    self.buffer.drain(..consumed);
                    return Ok(Incoming::Request(request));
                }

                Err(ParseError::Incomplete) => {
                    // Need more data → fall through to read
                }

                Err(e) => return Ok(Incoming::Rejected(rejection(e))),
            }

            let mut temp = [0u8; 4096];
            let n = self.stream.read(&mut temp).await?;

            if n == 0 {
                // Client closed connection
                return Ok(Incoming::Closed);
            }

            self.buffer.extend_from_slice(&temp[..n]);
        }
    }
}

fn rejection(err: ParseError) -> GatewayError {
    match err {
        ParseError::BodyTooLarge { limit } => GatewayError::PayloadTooLarge { limit },
        ParseError::HeadersTooLarge => GatewayError::MalformedRequest {
            status: StatusCode::HEADERS_TOO_LARGE,
            message: "Request headers too large".to_string(),
        },
        ParseError::UnsupportedTransferEncoding => GatewayError::MalformedRequest {
            status: StatusCode::NOT_IMPLEMENTED,
            message: "Unsupported transfer coding".to_string(),
        },
        other => GatewayError::MalformedRequest {
            status: StatusCode::BAD_REQUEST,
            message: format!("Malformed HTTP request: {other:?}"),
        },
    }
}
