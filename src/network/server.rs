//! WebSocket Duel Server
//!
//! Async WebSocket server for duel connections. Each socket gets a reader
//! loop feeding a [`ConnectionHandler`] and a writer task draining its
//! outbound channel.

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, instrument, warn};

use crate::core::ids::ConnectionId;
use crate::core::room_code::{MAX_CODE_LENGTH, MIN_CODE_LENGTH};
use crate::game::state::{DuelConfig, MAX_MATCH_DURATION};
use crate::network::auth::CredentialCheck;
use crate::network::connection::ConnectionHandler;
use crate::network::coordinator::SessionCoordinator;
use crate::network::protocol::ServerMessage;
use crate::network::registry::RegistryConfig;

/// Time the writer gets to flush the final frames after the reader stops.
const WRITER_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Outbound queue length per connection.
    pub outbound_buffer: usize,
    /// Server version string.
    pub version: String,
    /// Per-session settings.
    pub duel: DuelConfig,
    /// Room registry settings.
    pub registry: RegistryConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 1000,
            outbound_buffer: 64,
            version: env!("CARGO_PKG_VERSION").to_string(),
            duel: DuelConfig::default(),
            registry: RegistryConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `DUEL_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(addr) = env_parse::<SocketAddr>("DUEL_BIND_ADDR")? {
            config.bind_addr = addr;
        }
        if let Some(max) = env_parse::<usize>("DUEL_MAX_CONNECTIONS")? {
            config.max_connections = max;
        }
        if let Some(secs) = env_parse::<u64>("DUEL_MATCH_SECONDS")? {
            if secs == 0 || secs > MAX_MATCH_DURATION.as_secs() {
                return Err(ConfigError::Invalid(
                    "DUEL_MATCH_SECONDS",
                    format!("must be 1..={}", MAX_MATCH_DURATION.as_secs()),
                ));
            }
            config.duel.match_duration = Duration::from_secs(secs);
        }
        if let Some(ms) = env_parse::<u64>("DUEL_MIN_HIT_INTERVAL_MS")? {
            config.duel.min_hit_interval = Duration::from_millis(ms);
        }
        if let Some(len) = env_parse::<usize>("DUEL_CODE_LENGTH")? {
            if !(MIN_CODE_LENGTH..=MAX_CODE_LENGTH).contains(&len) {
                return Err(ConfigError::Invalid(
                    "DUEL_CODE_LENGTH",
                    format!("must be {}..={}", MIN_CODE_LENGTH, MAX_CODE_LENGTH),
                ));
            }
            config.registry.code_length = len;
        }
        if let Some(max) = env_parse::<usize>("DUEL_MAX_ROOMS")? {
            config.registry.max_rooms = max;
        }

        Ok(config)
    }
}

fn env_parse<T>(key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::Invalid(key, e.to_string())),
        Err(_) => Ok(None),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Variable present but unusable.
    #[error("Invalid {0}: {1}")]
    Invalid(&'static str, String),
}

/// Duel server errors.
#[derive(Debug, thiserror::Error)]
pub enum DuelServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// The duel server.
pub struct DuelServer {
    /// Server configuration.
    config: ServerConfig,
    /// Session coordinator shared by all connections.
    coordinator: Arc<SessionCoordinator>,
    /// Credential check for tokens, if configured.
    credentials: Option<Arc<dyn CredentialCheck>>,
    /// Open connections.
    connections: Arc<AtomicUsize>,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl DuelServer {
    /// Create a new duel server.
    pub fn new(config: ServerConfig) -> Self {
        let coordinator = SessionCoordinator::new(config.registry.clone(), config.duel.clone());
        Self::with_coordinator(config, Arc::new(coordinator))
    }

    /// Create a server around an existing coordinator.
    pub fn with_coordinator(config: ServerConfig, coordinator: Arc<SessionCoordinator>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            coordinator,
            credentials: None,
            connections: Arc::new(AtomicUsize::new(0)),
            shutdown_tx,
        }
    }

    /// Verify tokens sent with `create_room`/`join_room`.
    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialCheck>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Bind the configured address and run until shutdown.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), DuelServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Accept connections on `listener` until shutdown.
    #[instrument(skip(self, listener))]
    pub async fn serve(&self, listener: TcpListener) -> Result<(), DuelServerError> {
        info!(
            "Duel server v{} listening on {}",
            self.config.version,
            listener.local_addr()?
        );

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let open = self.connections.load(Ordering::Acquire);
                            if open >= self.config.max_connections {
                                warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            }

                            info!("New connection from {}", addr);
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

        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let coordinator = self.coordinator.clone();
        let credentials = self.credentials.clone();
        let connections = self.connections.clone();
        let buffer = self.config.outbound_buffer.max(1);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        connections.fetch_add(1, Ordering::AcqRel);

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    error!("WebSocket handshake failed for {}: {}", addr, e);
                    connections.fetch_sub(1, Ordering::AcqRel);
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(buffer);

            let id = ConnectionId::next();
            let mut handler = ConnectionHandler::open(id, coordinator, credentials, msg_tx.clone()).await;
            debug!("{} is {}", addr, id);

            // Spawn message sender task
            let mut sender_task = tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
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
                let _ = ws_sender.close().await;
            });

            // Handle incoming messages
            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                handler.handle_text(&text).await;
                            }
                            Some(Ok(Message::Binary(data))) => {
                                match std::str::from_utf8(&data) {
                                    Ok(text) => handler.handle_text(text).await,
                                    Err(_) => debug!("Non-UTF-8 binary frame from {}", addr),
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Client {} disconnected", addr);
                                break;
                            }
                            Some(Err(e)) => {
                                error!("WebSocket error for {}: {}", addr, e);
                                break;
                            }
                            // Ping/pong frames are answered by tungstenite
                            _ => {}
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        let _ = msg_tx.send(ServerMessage::Shutdown {
                            reason: "Server shutting down".to_string(),
                        }).await;
                        break;
                    }
                }
            }

            // Disconnect policy, then let the writer flush what is queued
            handler.close().await;
            drop(handler);
            drop(msg_tx);

            if tokio::time::timeout(WRITER_FLUSH_TIMEOUT, &mut sender_task).await.is_err() {
                sender_task.abort();
            }

            connections.fetch_sub(1, Ordering::AcqRel);
            info!("Client {} cleaned up", addr);
        });
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get active connection count.
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::Acquire)
    }

    /// Get open room count.
    pub async fn room_count(&self) -> usize {
        self.coordinator.registry().room_count().await
    }

    /// The session coordinator.
    pub fn coordinator(&self) -> &Arc<SessionCoordinator> {
        &self.coordinator
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}
