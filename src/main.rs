//! Catan Session Server
//!
//! Serves live Catan rooms over WebSocket until interrupted.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use catan_session::{
    network::{AuthConfig, JwtVerifier},
    ConnectionManager, GameRegistry, GameServer, MemoryStore, ServerConfig, VERSION,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Catan Session Server v{}", VERSION);

    let config = ServerConfig::from_env().context("reading server configuration")?;
    let auth = AuthConfig::from_env();
    if !auth.is_configured() {
        warn!("no AUTH_SECRET or AUTH_PUBLIC_KEY_PEM set; every connection will be refused");
    }

    let store = Arc::new(MemoryStore::new());
    let manager = Arc::new(ConnectionManager::new(
        store,
        Arc::new(JwtVerifier::new(auth)),
        GameRegistry::standard(),
    ));
    let server = GameServer::new(config, manager);

    let signal_server = server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, shutting down");
            signal_server.shutdown();
        }
    });

    server.run().await.context("game server failed")?;
    info!("Server stopped");
    Ok(())
}
