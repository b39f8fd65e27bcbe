//! WebSocket Game Server
//!
//! Async WebSocket server for live game rooms. Accepts TCP connections,
//! performs the upgrade, and pumps frames between each socket and the
//! [`ConnectionManager`]. Every connection gets a bounded outbound queue
//! drained by its own writer task; inbound frames are handled strictly in
//! arrival order.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, instrument, warn};

use crate::network::manager::ConnectionManager;
use crate::network::protocol::Outbound;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Outbound queue depth per connection.
    pub outbound_buffer: usize,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 1000,
            outbound_buffer: 64,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `BIND_ADDR`, `MAX_CONNECTIONS` and
    /// `OUTBOUND_BUFFER`.
    pub fn from_env() -> Result<Self, GameServerError> {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("BIND_ADDR") {
            config.bind_addr = addr
                .parse()
                .map_err(|_| GameServerError::Config(format!("BIND_ADDR: invalid address {:?}", addr)))?;
        }
        if let Ok(max) = std::env::var("MAX_CONNECTIONS") {
            config.max_connections = max
                .parse()
                .map_err(|_| GameServerError::Config(format!("MAX_CONNECTIONS: not a number: {:?}", max)))?;
        }
        if let Ok(depth) = std::env::var("OUTBOUND_BUFFER") {
            config.outbound_buffer = match depth.parse() {
                Ok(0) | Err(_) => {
                    return Err(GameServerError::Config(format!(
                        "OUTBOUND_BUFFER: expected a positive number, got {:?}",
                        depth
                    )))
                }
                Ok(n) => n,
            };
        }

        Ok(config)
    }
}

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// The game server.
#[derive(Clone)]
pub struct GameServer {
    /// Server configuration.
    config: ServerConfig,
    /// Rooms and connections.
    manager: Arc<ConnectionManager>,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a new game server.
    pub fn new(config: ServerConfig, manager: Arc<ConnectionManager>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            manager,
            shutdown_tx,
        }
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bind the configured address and run until shutdown.
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.run_with_listener(listener).await
    }

    /// Run on an already-bound listener until shutdown.
    #[instrument(skip(self, listener))]
    pub async fn run_with_listener(&self, listener: TcpListener) -> Result<(), GameServerError> {
        let local_addr = listener.local_addr()?;
        let routes: Vec<&str> = self.manager.registry().paths().collect();
        info!(addr = %local_addr, routes = ?routes, version = %self.config.version, "game server listening");

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let live = self.manager.connection_count().await;
                            if live >= self.config.max_connections {
                                warn!(%addr, live, "connection limit reached, rejecting");
                                continue;
                            }

                            debug!(%addr, "new connection");
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        let closing = self.manager.shutdown_all().await;
        info!(connections = closing, "closed live connections");
        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let manager = self.manager.clone();
        let buffer = self.config.outbound_buffer;

        tokio::spawn(async move {
            let mut target: Option<(String, Option<String>)> = None;
            let capture = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
                let uri = request.uri();
                target = Some((uri.path().to_string(), uri.query().map(str::to_string)));
                Ok(response)
            };

            let ws_stream = match accept_hdr_async(stream, capture).await {
                Ok(ws) => ws,
                Err(e) => {
                    debug!(%addr, error = %e, "websocket handshake failed");
                    return;
                }
            };
            let (path, query) = target.unwrap_or_else(|| ("/".to_string(), None));

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (out_tx, mut out_rx) = mpsc::channel::<Outbound>(buffer);

            // Writer: drains the queue until a close is requested
            let mut sender_task = tokio::spawn(async move {
                while let Some(item) = out_rx.recv().await {
                    match item {
                        Outbound::Frame(msg) => {
                            let text = match msg.to_json() {
                                Ok(t) => t,
                                Err(e) => {
                                    error!("Failed to serialize message: {}", e);
                                    continue;
                                }
                            };
                            if ws_sender.send(Message::Text(text)).await.is_err() {
                                break;
                            }
                        }
                        Outbound::Close(close) => {
                            let frame = CloseFrame {
                                code: CloseCode::from(close.code),
                                reason: close.reason.into(),
                            };
                            let _ = ws_sender.send(Message::Close(Some(frame))).await;
                            break;
                        }
                    }
                }
            });

            let id = manager.connect(&path, query.as_deref(), out_tx).await;
            debug!(%addr, connection = id, path = %path, "socket registered");

            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                manager.handle_text(id, &text).await;
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!(connection = id, "client closed");
                                break;
                            }
                            Some(Err(e)) => {
                                debug!(connection = id, error = %e, "websocket error");
                                break;
                            }
                            // Binary, ping and pong carry nothing for us
                            Some(Ok(_)) => {}
                        }
                    }
                    _ = &mut sender_task => {
                        debug!(connection = id, "writer finished");
                        break;
                    }
                }
            }

            manager.disconnect(id).await;
            sender_task.abort();
        });
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get active connection count.
    pub async fn connection_count(&self) -> usize {
        self.manager.connection_count().await
    }

    /// Get live room count.
    pub async fn room_count(&self) -> usize {
        self.manager.room_count().await
    }
}
