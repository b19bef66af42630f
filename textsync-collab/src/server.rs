//! WebSocket relay server.
//!
//! Architecture:
//! ```text
//! Client A ──┐                                   ┌── outbox A ──► Client A
//!             ├── decode ClientEvent ── Relay ────┤
//! Client B ──┘                 (RoomRegistry)    └── outbox B ──► Client B
//! ```
//!
//! Each connection runs one task that multiplexes its socket reads with its
//! outbound queue. Events from one connection are handled strictly in
//! arrival order, and the registry is cleaned up as soon as the socket
//! closes, before anything else from that connection could be processed.
//!
//! The server keeps no document text. Late joiners get their content from
//! an existing member through `request-state` / `sync-state`.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::cursor::Selection;
use crate::protocol::{ClientEvent, ServerEvent};
use crate::registry::ConnectionId;
use crate::relay::Relay;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Largest accepted WebSocket message/frame, in bytes
    pub max_frame_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            max_frame_bytes: 1 << 20,
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    pub active_rooms: usize,
    pub relayed_events: u64,
}

/// The relay server.
pub struct SyncServer {
    config: ServerConfig,
    relay: Arc<Relay>,
    stats: Arc<RwLock<ServerStats>>,
}

impl SyncServer {
    /// Create a server; nothing is bound until [`run`](Self::run).
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            relay: Arc::new(Relay::new()),
            stats: Arc::new(RwLock::new(ServerStats::default())),
        }
    }

    /// Server with [`ServerConfig::default`].
    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    /// Bind `bind_addr` and serve until the listener fails.
    pub async fn run(&self) -> Result<(), BoxError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Relay listening on {}", self.config.bind_addr);
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), BoxError> {
        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let relay = self.relay.clone();
            let stats = self.stats.clone();
            let config = self.config.clone();

            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, relay, stats, config).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        relay: Arc<Relay>,
        stats: Arc<RwLock<ServerStats>>,
        config: ServerConfig,
    ) -> Result<(), BoxError> {
        let ws_config = WebSocketConfig::default()
            .max_message_size(Some(config.max_frame_bytes))
            .max_frame_size(Some(config.max_frame_bytes));
        let ws_stream = tokio_tungstenite::accept_async_with_config(stream, Some(ws_config)).await?;

        let conn_id = Uuid::new_v4();
        let (outbox, inbox) = mpsc::unbounded_channel();
        relay.connect(conn_id, outbox).await;
        log::info!("WebSocket connection {conn_id} established from {addr}");

        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        let result = Self::pump(ws_stream, inbox, conn_id, addr, &relay, &stats).await;

        // Cleanup runs whether the socket closed cleanly or failed.
        relay.disconnect(conn_id).await;
        {
            let mut s = stats.write().await;
            s.active_connections = s.active_connections.saturating_sub(1);
        }
        log::info!("Connection {conn_id} from {addr} closed");

        result
    }

    /// Move events between the socket and the connection's outbox until
    /// either side ends.
    async fn pump(
        ws_stream: tokio_tungstenite::WebSocketStream<TcpStream>,
        mut inbox: mpsc::UnboundedReceiver<ServerEvent>,
        conn_id: ConnectionId,
        addr: SocketAddr,
        relay: &Relay,
        stats: &RwLock<ServerStats>,
    ) -> Result<(), BoxError> {
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        loop {
            tokio::select! {
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            {
                                let mut s = stats.write().await;
                                s.total_messages += 1;
                                s.total_bytes += text.len() as u64;
                            }

                            match ClientEvent::decode(text.as_str()) {
                                Ok(event) => {
                                    log::trace!("{conn_id} sent {}", event.name());
                                    Self::dispatch(relay, conn_id, event).await;
                                }
                                Err(e) => {
                                    log::warn!("Failed to decode event from {addr}: {e}");
                                }
                            }
                        }

                        Some(Ok(Message::Binary(_))) => {
                            log::warn!("Ignoring binary frame from {addr}");
                        }

                        Some(Ok(Message::Ping(data))) => {
                            ws_sender.send(Message::Pong(data)).await?;
                        }

                        Some(Ok(Message::Close(_))) | None => {
                            log::debug!("Connection closed from {addr}");
                            break;
                        }

                        Some(Err(e)) => {
                            log::error!("WebSocket error from {addr}: {e}");
                            break;
                        }

                        _ => {}
                    }
                }

                outgoing = inbox.recv() => {
                    let Some(event) = outgoing else {
                        break;
                    };
                    let encoded = event.encode()?;
                    ws_sender.send(Message::Text(encoded.into())).await?;
                }
            }
        }

        Ok(())
    }

    async fn dispatch(relay: &Relay, conn_id: ConnectionId, event: ClientEvent) {
        match event {
            ClientEvent::JoinRoom { room_id, username } => {
                relay.join(conn_id, &room_id, &username).await;
            }
            ClientEvent::SyncState { target_id, content } => {
                relay.sync_state(conn_id, target_id, content).await;
            }
            ClientEvent::TextChange { room_id, delta } => {
                relay.text_change(conn_id, &room_id, delta).await;
            }
            ClientEvent::CursorMove {
                room_id,
                selection_start,
                selection_end,
            } => {
                let selection = Selection::new(selection_start, selection_end);
                relay.cursor_move(conn_id, &room_id, selection).await;
            }
            ClientEvent::Ping => relay.ping(conn_id).await,
        }
    }

    /// Get server statistics.
    ///
    /// Room and relay counts are read from the relay at call time.
    pub async fn stats(&self) -> ServerStats {
        let mut stats = self.stats.read().await.clone();
        stats.active_rooms = self.relay.room_count().await;
        stats.relayed_events = self.relay.relayed_events();
        stats
    }

    /// Shared handle to the relay, for inspection.
    pub fn relay(&self) -> Arc<Relay> {
        self.relay.clone()
    }

    /// Configured listen address.
    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    /// Active configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}
