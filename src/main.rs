use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use logrelay::config::Config;
use logrelay::server::{self, App};
use logrelay::store::Store;

/// Interval for the background sweep of expired store entries.
const SWEEP_INTERVAL: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let config = Config::parse();

    let store = Store::new();
    store.start_sweeper(SWEEP_INTERVAL);
    let app = App::new(store, config.clone());

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.http_port))
        .await
        .with_context(|| format!("failed to bind port {}", config.http_port))?;
    info!("listening on port {}", config.http_port);

    let shutdown = app.shutdown_token();
    axum::serve(listener, server::router(app))
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await
        .context("server error")?;

    info!("shut down");
    Ok(())
}

async fn shutdown_signal(shutdown: tokio_util::sync::CancellationToken) {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
    info!("shutting down");
    // Live subscribers observe this as a disconnect and end their streams.
    shutdown.cancel();
}
