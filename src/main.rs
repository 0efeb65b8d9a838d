use std::sync::Arc;

use api_gateway::config::Config;
use api_gateway::gateway::Gateway;
use api_gateway::server::listener;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    let cfg = Config::load()?;
    let gateway = Arc::new(Gateway::from_config(&cfg)?);

    for route in gateway.routes().routes() {
        tracing::info!(
            prefix = %route.prefix,
            backend = %route.backend.url,
            auth = route.require_auth,
            "Route registered"
        );
    }
    tracing::info!(
        limit = cfg.rate_limit.limit,
        window_secs = cfg.rate_limit.window_secs,
        "Rate limit per client IP"
    );

    let listener = listener::bind(&cfg.server.listen_addr).await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut server = tokio::spawn(listener::run(listener, Arc::clone(&gateway), shutdown_rx));

    tokio::select! {
        res = &mut server => {
            res??;
        }

        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
            let _ = shutdown_tx.send(true);
            server.await??;
        }
    }

    gateway.shutdown().await;

    Ok(())
}
