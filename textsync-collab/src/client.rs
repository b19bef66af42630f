//! WebSocket client for one participant of one room.
//!
//! Provides:
//! - Connection lifecycle (connect, disconnect)
//! - `join-room` on connect
//! - Sending deltas, selections and state hand-offs
//! - A channel of [`SyncEvent`]s for the application's event loop
//!
//! The client does not touch the buffer. Feed its events to a
//! [`SharedDocument`](crate::document::SharedDocument) and send back
//! whatever that returns.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::cursor::Selection;
use crate::protocol::{ClientEvent, Delta, ProtocolError, ServerEvent};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events emitted by the sync client.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// Connection established and `join-room` sent
    Connected,
    /// Connection lost
    Disconnected,
    /// Any event relayed by the server
    Server(ServerEvent),
}

/// The sync client.
pub struct SyncClient {
    username: String,
    room_id: String,

    state: Arc<RwLock<ConnectionState>>,

    /// Channel to the WebSocket writer task
    outgoing_tx: Option<mpsc::Sender<String>>,

    /// Event receiver for the application
    event_rx: Option<mpsc::Receiver<SyncEvent>>,

    /// Event sender (held by the reader task)
    event_tx: mpsc::Sender<SyncEvent>,

    server_url: String,
}

impl SyncClient {
    /// Create a disconnected client for one room.
    pub fn new(
        username: impl Into<String>,
        room_id: impl Into<String>,
        server_url: impl Into<String>,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            username: username.into(),
            room_id: room_id.into(),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            outgoing_tx: None,
            event_rx: Some(event_rx),
            event_tx,
            server_url: server_url.into(),
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<SyncEvent>> {
        self.event_rx.take()
    }

    /// Connect to the server and join the room.
    ///
    /// Spawns background tasks for reading/writing WebSocket messages.
    pub async fn connect(&mut self) -> Result<(), ProtocolError> {
        *self.state.write().await = ConnectionState::Connecting;

        let ws_stream = match tokio_tungstenite::connect_async(self.server_url.as_str()).await {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(ProtocolError::Transport(e.to_string()));
            }
        };
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        // Writer task: forward the outgoing channel to the socket, close the
        // socket once every sender is dropped.
        let (out_tx, mut out_rx) = mpsc::channel::<String>(256);
        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if ws_writer.send(Message::Text(text.into())).await.is_err() {
                    return;
                }
            }
            let _ = ws_writer.send(Message::Close(None)).await;
        });
        self.outgoing_tx = Some(out_tx);

        let join = ClientEvent::JoinRoom {
            room_id: self.room_id.clone(),
            username: self.username.clone(),
        };
        self.send_event(&join).await?;

        *self.state.write().await = ConnectionState::Connected;
        let _ = self.event_tx.send(SyncEvent::Connected).await;
        log::info!("{} connected to room {}", self.username, self.room_id);

        // Reader task: decode server events for the application.
        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Text(text)) => match ServerEvent::decode(text.as_str()) {
                        Ok(event) => {
                            if event_tx.send(SyncEvent::Server(event)).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => log::warn!("Dropping undecodable server event: {e}"),
                    },
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }

            *state.write().await = ConnectionState::Disconnected;
            let _ = event_tx.send(SyncEvent::Disconnected).await;
        });

        Ok(())
    }

    /// Close the connection. Queued events are flushed first.
    pub async fn disconnect(&mut self) {
        self.outgoing_tx = None;
        *self.state.write().await = ConnectionState::Disconnected;
    }

    /// Send any client event.
    pub async fn send_event(&self, event: &ClientEvent) -> Result<(), ProtocolError> {
        let tx = self
            .outgoing_tx
            .as_ref()
            .ok_or(ProtocolError::ConnectionClosed)?;
        let encoded = event.encode()?;
        tx.send(encoded)
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)
    }

    /// Send a local delta to the rest of the room.
    pub async fn send_text_change(&self, delta: Delta) -> Result<(), ProtocolError> {
        self.send_event(&ClientEvent::TextChange {
            room_id: self.room_id.clone(),
            delta,
        })
        .await
    }

    /// Publish the local selection.
    pub async fn send_cursor(&self, selection: Selection) -> Result<(), ProtocolError> {
        self.send_event(&ClientEvent::CursorMove {
            room_id: self.room_id.clone(),
            selection_start: selection.start,
            selection_end: selection.end,
        })
        .await
    }

    /// Answer a `request-state` with the full buffer.
    pub async fn send_state(&self, target_id: Uuid, content: String) -> Result<(), ProtocolError> {
        self.send_event(&ClientEvent::SyncState { target_id, content })
            .await
    }

    /// Application-level heartbeat; the server answers with `pong`.
    pub async fn send_ping(&self) -> Result<(), ProtocolError> {
        self.send_event(&ClientEvent::Ping).await
    }

    /// Current connection state.
    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Name announced in `join-room`.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Room joined on connect.
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// WebSocket URL of the relay.
    pub fn server_url(&self) -> &str {
        &self.server_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = SyncClient::new("alice", "notes", "ws://localhost:9090");
        assert_eq!(client.username(), "alice");
        assert_eq!(client.room_id(), "notes");
        assert_eq!(client.server_url(), "ws://localhost:9090");
    }

    #[tokio::test]
    async fn test_client_initial_state() {
        let client = SyncClient::new("alice", "notes", "ws://localhost:9090");
        assert_eq!(client.connection_state().await, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_send_while_disconnected_fails() {
        let client = SyncClient::new("alice", "notes", "ws://localhost:9090");
        assert_eq!(
            client.send_text_change(Delta::insert(0, "x")).await,
            Err(ProtocolError::ConnectionClosed)
        );
        assert_eq!(
            client.send_cursor(Selection::caret(0)).await,
            Err(ProtocolError::ConnectionClosed)
        );
        assert_eq!(client.send_ping().await, Err(ProtocolError::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_connect_to_nothing_fails() {
        // Bind then drop to get a port nobody listens on.
        let port = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let mut client = SyncClient::new("alice", "notes", format!("ws://127.0.0.1:{port}"));

        assert!(matches!(
            client.connect().await,
            Err(ProtocolError::Transport(_))
        ));
        assert_eq!(client.connection_state().await, ConnectionState::Disconnected);
    }

    #[test]
    fn test_take_event_rx() {
        let mut client = SyncClient::new("alice", "notes", "ws://localhost:9090");
        assert!(client.take_event_rx().is_some());
        assert!(client.take_event_rx().is_none());
    }
}
