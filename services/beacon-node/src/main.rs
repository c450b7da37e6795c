//! Beacon dispatch node
//!
//! Serves the task dispatch HTTP API and the live WebSocket feed from one
//! process. Configuration comes from the TOML file named by `BEACON_CONFIG`
//! (defaults otherwise) with `BEACON_*` environment overrides.

use anyhow::Context;
use beacon_core::{logging, Config};
use beacon_realtime::{ConnectionDirectory, RealtimeNotifier, WsServer};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

mod error;
mod handlers;
mod routes;
mod state;

use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::var_os("BEACON_CONFIG").map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;
    logging::init_from_config(&config.logging);

    let state = Arc::new(AppState::new(&config)?);

    let directory = Arc::new(ConnectionDirectory::new());
    let notifier = Arc::new(RealtimeNotifier::new(directory.clone()));
    tokio::spawn(notifier.run(state.bus.subscribe()));

    let ws_addr: SocketAddr = config
        .server
        .ws_addr
        .parse()
        .with_context(|| format!("invalid ws_addr {}", config.server.ws_addr))?;
    let ws_server = Arc::new(WsServer::new(ws_addr, directory));
    tokio::spawn(async move {
        if let Err(e) = ws_server.run().await {
            error!(error = %e, "WebSocket server stopped");
        }
    });

    let app = routes::router(state);
    let listener = TcpListener::bind(&config.server.http_addr).await?;
    info!(
        http_addr = %config.server.http_addr,
        ws_addr = %ws_addr,
        "Beacon node listening"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
