//! Shared helpers: in-process mock backends, a gateway on an ephemeral port
//! and a minimal HTTP client.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use api_gateway::config::Config;
use api_gateway::gateway::Gateway;
use api_gateway::middleware::RateLimiter;
use api_gateway::routes::RouteTable;
use api_gateway::server::listener;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, watch};

pub const SECRET: &str = "test-secret";

#[derive(Clone)]
pub enum Behavior {
    Respond {
        status: u16,
        headers: Vec<(String, String)>,
        body: Vec<u8>,
    },
    /// Accepts the connection and never answers.
    Hang,
}

impl Behavior {
    pub fn ok(body: &str) -> Self {
        Behavior::Respond {
            status: 200,
            headers: vec![("Content-Type".into(), "application/json".into())],
            body: body.as_bytes().to_vec(),
        }
    }

    pub fn status(status: u16, body: &str) -> Self {
        Behavior::Respond {
            status,
            headers: vec![],
            body: body.as_bytes().to_vec(),
        }
    }
}

pub struct MockBackend {
    pub url: String,
    pub calls: Arc<AtomicUsize>,
    pub requests: Arc<Mutex<Vec<String>>>,
}

impl MockBackend {
    pub async fn spawn(behavior: Behavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let requests = Arc::new(Mutex::new(Vec::new()));

        let (task_calls, task_requests) = (Arc::clone(&calls), Arc::clone(&requests));
        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    break;
                };
                let behavior = behavior.clone();
                let calls = Arc::clone(&task_calls);
                let requests = Arc::clone(&task_requests);
                tokio::spawn(async move {
                    serve_one(socket, behavior, calls, requests).await;
                });
            }
        });

        Self {
            url: format!("http://{addr}"),
            calls,
            requests,
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn last_request(&self) -> String {
        self.requests.lock().await.last().cloned().unwrap_or_default()
    }
}

async fn serve_one(
    mut socket: TcpStream,
    behavior: Behavior,
    calls: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<String>>>,
) {
    let raw = read_request(&mut socket).await;
    calls.fetch_add(1, Ordering::SeqCst);
    requests.lock().await.push(String::from_utf8_lossy(&raw).into_owned());

    match behavior {
        Behavior::Respond {
            status,
            headers,
            body,
        } => {
            let mut out = format!("HTTP/1.1 {status} Mock\r\n");
            for (k, v) in headers {
                out.push_str(&format!("{k}: {v}\r\n"));
            }
            out.push_str(&format!("Content-Length: {}\r\n\r\n", body.len()));
            let mut bytes = out.into_bytes();
            bytes.extend_from_slice(&body);
            let _ = socket.write_all(&bytes).await;
            let _ = socket.shutdown().await;
        }
        Behavior::Hang => {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
    }
}

/// Reads one request (head plus Content-Length body).
async fn read_request(socket: &mut TcpStream) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
            let length = head
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + length {
                return buf;
            }
        }
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return buf,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
}

/// A port nothing listens on.
pub async fn closed_port_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

pub fn test_config(user: &str, product: &str, order: &str) -> Config {
    let mut config = Config::default();
    config.services.user = user.to_string();
    config.services.product = product.to_string();
    config.services.order = order.to_string();
    config.auth.jwt_secret = SECRET.to_string();
    config.health.timeout_secs = 1;
    config.proxy.request_timeout_secs = 2;
    config.proxy.connect_timeout_secs = 1;
    config
}

pub struct RunningGateway {
    pub addr: SocketAddr,
    pub gateway: Arc<Gateway>,
    shutdown: watch::Sender<bool>,
}

impl RunningGateway {
    pub async fn start(config: Config) -> Self {
        let routes = RouteTable::from_config(&config).unwrap();
        let limiter = Arc::new(RateLimiter::new(
            config.rate_limit.limit,
            config.rate_limit.window(),
        ));
        let gateway = Arc::new(Gateway::new(&config, routes, limiter));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown, rx) = watch::channel(false);
        tokio::spawn(listener::run(listener, Arc::clone(&gateway), rx));

        Self {
            addr,
            gateway,
            shutdown,
        }
    }

    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }
}

pub struct ClientResponse {
    pub status: u16,
    pub head: String,
    pub body: Vec<u8>,
}

impl ClientResponse {
    pub fn header(&self, name: &str) -> Option<String> {
        let prefix = format!("{}:", name.to_ascii_lowercase());
        self.head.lines().find_map(|line| {
            line.to_ascii_lowercase()
                .starts_with(&prefix)
                .then(|| line[prefix.len()..].trim().to_string())
        })
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap()
    }
}

/// Sends `method path` with extra header lines and reads the full response.
pub async fn send(addr: SocketAddr, method: &str, path: &str, headers: &[(&str, &str)], body: &[u8]) -> ClientResponse {
    let mut raw = format!("{method} {path} HTTP/1.1\r\nHost: gateway.test\r\nConnection: close\r\n");
    for (k, v) in headers {
        raw.push_str(&format!("{k}: {v}\r\n"));
    }
    if !body.is_empty() {
        raw.push_str(&format!("Content-Length: {}\r\n", body.len()));
    }
    raw.push_str("\r\n");
    let mut bytes = raw.into_bytes();
    bytes.extend_from_slice(body);

    send_raw(addr, &bytes).await
}

pub async fn send_raw(addr: SocketAddr, bytes: &[u8]) -> ClientResponse {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(bytes).await.unwrap();

    let mut out = Vec::new();
    stream.read_to_end(&mut out).await.unwrap();

    let end = out
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("response head");
    let head = String::from_utf8_lossy(&out[..end]).into_owned();
    let status = head
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .expect("status code");

    ClientResponse {
        status,
        head,
        body: out[end + 4..].to_vec(),
    }
}

pub fn token(user_id: i64, exp_offset_secs: i64) -> String {
    let claims = serde_json::json!({
        "user_id": user_id,
        "username": "alice",
        "email": "alice@example.com",
        "exp": chrono::Utc::now().timestamp() + exp_offset_secs,
    });
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}
