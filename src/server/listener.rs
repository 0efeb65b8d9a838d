use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use crate::gateway::Gateway;
use crate::http::connection::Connection;

pub async fn bind(addr: &str) -> anyhow::Result<TcpListener> {
    let listener = TcpListener::bind(addr).await?;
    info!("Listening on {}", listener.local_addr()?);
    Ok(listener)
}

/// Accepts connections until `shutdown` turns true or its sender is dropped.
///
/// Each connection runs on its own task. Connections already in flight are
/// not waited for.
pub async fn run(
    listener: TcpListener,
    gateway: Arc<Gateway>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (socket, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        tracing::error!("Failed to accept connection: {}", e);
                        continue;
                    }
                };
                tracing::debug!("Accepted connection from {}", peer);

                let gateway = Arc::clone(&gateway);
                tokio::spawn(async move {
                    let mut conn = Connection::new(socket, peer, gateway);
                    if let Err(e) = conn.run().await {
                        tracing::error!("Connection error from {}: {}", peer, e);
                    }
                });
            }

            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("Listener shutting down");
                    break;
                }
            }
        }
    }

    Ok(())
}
