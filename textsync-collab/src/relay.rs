//! Event coordinator on top of the [`RoomRegistry`].
//!
//! Content (`text-change`, `sync-state`) and presence (`cursor-move`,
//! joins, departures) are relayed independently but share one membership
//! view. Every registry mutation and the broadcasts it causes are queued
//! under the same lock, so no recipient ever sees a departure before the
//! registry reflects it, or presence for a room it is not in.
//!
//! Deltas are forwarded verbatim. The relay never inspects, validates or
//! merges them.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::RwLock;

use crate::cursor::Selection;
use crate::protocol::{Delta, ServerEvent};
use crate::registry::{ConnectionId, JoinOutcome, Outbox, RoomRegistry};

/// Relay for every room served by one process.
#[derive(Debug, Default)]
pub struct Relay {
    registry: RwLock<RoomRegistry>,
    relayed: AtomicU64,
}

impl Relay {
    /// Relay with no connections and no rooms.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a freshly accepted connection.
    pub async fn connect(&self, id: ConnectionId, outbox: Outbox) {
        let mut registry = self.registry.write().await;
        let member = registry.register(id, outbox);
        log::debug!("Connection {id} registered with color {}", member.color);
    }

    /// Handle `join-room`.
    ///
    /// For a non-empty room, exactly one existing member is asked for its
    /// buffer on behalf of the joiner, then every existing member learns
    /// about the joiner. The joiner is never told about itself.
    pub async fn join(&self, id: ConnectionId, room_id: &str, username: &str) {
        let mut registry = self.registry.write().await;

        let outcome = match registry.join(room_id, id, username) {
            Ok(outcome) => outcome,
            Err(e) => {
                log::warn!("Rejected join to room {room_id}: {e}");
                return;
            }
        };

        match outcome {
            JoinOutcome::Created => {
                log::info!("Room {room_id} created by {username} ({id})");
            }
            JoinOutcome::Joined => {
                let source = registry.request_state(room_id, id);
                match source {
                    Some(_) => self.bump(1),
                    None => log::warn!("No member of room {room_id} can hand state to {id}"),
                }

                let Some(joiner) = registry.member(&id) else {
                    return;
                };
                let event = ServerEvent::UserJoined {
                    id,
                    color: joiner.color.clone(),
                    username: joiner.username.clone(),
                };
                let sent = registry.for_each_member(room_id, Some(id), |m| {
                    m.send(event.clone());
                });
                self.bump(sent);

                log::info!(
                    "{username} ({id}) joined room {room_id}; state requested from {source:?}"
                );
            }
            JoinOutcome::AlreadyMember => {
                log::debug!("{id} re-joined room {room_id}; nothing to hand off");
            }
        }
    }

    /// Handle `sync-state`: forward the buffer to its addressee only.
    ///
    /// Only the member that was sent the matching `request-state` may
    /// answer, and only once. Anything else is dropped.
    pub async fn sync_state(&self, from: ConnectionId, target: ConnectionId, content: String) {
        let mut registry = self.registry.write().await;
        if !registry.complete_handoff(from, target) {
            log::warn!("Ignored sync-state from {from} to {target}: no hand-off requested");
            return;
        }
        let len = content.len();
        if registry.send_to(target, ServerEvent::ReceiveState { content }) {
            self.bump(1);
            log::debug!("State hand-off {from} -> {target} ({len} bytes)");
        } else {
            log::debug!("Dropped state hand-off from {from}: {target} is not connected");
        }
    }

    /// Handle `text-change`: forward the delta to everyone else in the room.
    pub async fn text_change(&self, from: ConnectionId, room_id: &str, delta: Delta) {
        let registry = self.registry.read().await;
        if !registry.is_member(room_id, &from) {
            log::debug!("Ignored text-change from {from}: not a member of room {room_id}");
            return;
        }

        let event = ServerEvent::RemoteChange {
            sender_id: from,
            delta,
        };
        let sent = registry.for_each_member(room_id, Some(from), |m| {
            m.send(event.clone());
        });
        self.bump(sent);
        log::debug!("Relayed delta from {from} to {sent} peers in room {room_id}");
    }

    /// Handle `cursor-move`: store the selection, then forward it with the
    /// sender's identity attached.
    pub async fn cursor_move(&self, from: ConnectionId, room_id: &str, selection: Selection) {
        let mut registry = self.registry.write().await;
        if !registry.is_member(room_id, &from) {
            log::debug!("Ignored cursor-move from {from}: not a member of room {room_id}");
            return;
        }

        let Some(member) = registry.set_selection(from, selection) else {
            return;
        };
        let event = ServerEvent::RemoteCursor {
            id: from,
            selection_start: selection.start,
            selection_end: selection.end,
            color: member.color.clone(),
            username: member.username.clone(),
        };
        let sent = registry.for_each_member(room_id, Some(from), |m| {
            m.send(event.clone());
        });
        self.bump(sent);
        log::trace!("Cursor {from} -> {selection:?} in room {room_id}");
    }

    /// Answer an application-level ping.
    pub async fn ping(&self, from: ConnectionId) {
        let registry = self.registry.read().await;
        registry.send_to(from, ServerEvent::Pong);
    }

    /// Remove a closed connection from every room and tell whoever remains.
    pub async fn disconnect(&self, id: ConnectionId) {
        let mut registry = self.registry.write().await;
        let Some(departure) = registry.unregister(id) else {
            return;
        };

        for exit in &departure.exits {
            if exit.closed {
                log::info!("Room {} removed (empty)", exit.room_id);
                continue;
            }
            let sent = registry.for_each_member(&exit.room_id, None, |m| {
                m.send(ServerEvent::UserLeft { id });
            });
            self.bump(sent);
            log::info!(
                "{} ({id}) left room {}",
                departure.member.username,
                exit.room_id
            );
        }
    }

    /// Number of rooms with at least one member.
    pub async fn room_count(&self) -> usize {
        self.registry.read().await.room_count()
    }

    /// A room exists while it has at least one member.
    pub async fn contains_room(&self, room_id: &str) -> bool {
        self.registry.read().await.contains_room(room_id)
    }

    /// Member ids of `room_id` in join order.
    pub async fn members_of(&self, room_id: &str) -> Vec<ConnectionId> {
        self.registry.read().await.members_of(room_id)
    }

    /// Last selection stored for a connection.
    pub async fn selection_of(&self, id: ConnectionId) -> Option<Selection> {
        self.registry.read().await.member(&id).map(|m| m.selection)
    }

    /// State hand-offs still waiting for their `sync-state`.
    pub async fn pending_handoffs(&self) -> usize {
        self.registry.read().await.pending_handoffs()
    }

    /// Events queued for delivery since startup.
    pub fn relayed_events(&self) -> u64 {
        self.relayed.load(Ordering::Relaxed)
    }

    fn bump(&self, n: usize) {
        self.relayed.fetch_add(n as u64, Ordering::Relaxed);
    }
}
