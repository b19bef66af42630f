//! In-memory room membership.
//!
//! ```text
//! rooms:        "notes" ──► [conn A, conn B]   (join order)
//!               "todo"  ──► [conn B]
//! connections:  conn A  ──► Member { username, color, selection, outbox, rooms }
//!               conn B  ──► Member { … }
//! ```
//!
//! The registry holds no document text. A room exists only while it has at
//! least one member: it is created by the first join and dropped by the last
//! departure. Locking is the caller's job; see [`crate::relay::Relay`].
//!
//! A connection may sit in several rooms at once, but relayed events carry
//! no room id, so such a client cannot tell which of its rooms an event came
//! from. Clients in this crate open one connection per room.

use std::collections::{HashMap, HashSet};

use indexmap::IndexSet;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::cursor::Selection;
use crate::presence::color_for;
use crate::protocol::ServerEvent;

/// Transport-assigned identity of one connection.
pub type ConnectionId = Uuid;

/// Queue of events waiting to be written to one connection.
pub type Outbox = mpsc::UnboundedSender<ServerEvent>;

/// A connected participant.
#[derive(Debug, Clone)]
pub struct Member {
    pub id: ConnectionId,
    pub username: String,
    /// Fixed at registration.
    pub color: String,
    pub selection: Selection,
    rooms: IndexSet<String>,
    outbox: Outbox,
}

impl Member {
    /// Queue an event for this member. `false` if its connection is gone.
    pub fn send(&self, event: ServerEvent) -> bool {
        self.outbox.send(event).is_ok()
    }

    /// Rooms this member has joined, in join order.
    pub fn rooms(&self) -> impl Iterator<Item = &str> {
        self.rooms.iter().map(String::as_str)
    }
}

#[derive(Debug, Default)]
struct Room {
    members: IndexSet<ConnectionId>,
}

/// What a join did to the registry.
///
/// Joining a second room on the same connection is allowed, but the events
/// relayed to that connection do not say which room they belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// The room did not exist; the joiner is its only member.
    Created,
    /// The room had members; one of them should hand over its buffer
    /// (see [`RoomRegistry::request_state`]).
    Joined,
    /// The connection was already a member; only the username was refreshed.
    AlreadyMember,
}

/// A room the departing connection was in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomExit {
    pub room_id: String,
    /// The room had no members left and was removed.
    pub closed: bool,
}

/// Result of [`RoomRegistry::unregister`].
#[derive(Debug, Clone)]
pub struct Departure {
    pub member: Member,
    pub exits: Vec<RoomExit>,
}

/// Registry errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("connection {0} is not registered")]
    UnknownConnection(ConnectionId),
}

/// Room and connection maps behind one owner.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: HashMap<String, Room>,
    connections: HashMap<ConnectionId, Member>,
    /// Outstanding `(target, source)` state hand-offs.
    handoffs: HashSet<(ConnectionId, ConnectionId)>,
}

impl RoomRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new connection. It belongs to no room until it joins one.
    pub fn register(&mut self, id: ConnectionId, outbox: Outbox) -> &Member {
        self.connections.entry(id).or_insert_with(|| Member {
            id,
            username: String::new(),
            color: color_for(id),
            selection: Selection::default(),
            rooms: IndexSet::new(),
            outbox,
        })
    }

    /// Add a registered connection to `room_id`, creating the room if needed.
    pub fn join(
        &mut self,
        room_id: &str,
        id: ConnectionId,
        username: &str,
    ) -> Result<JoinOutcome, RegistryError> {
        let member = self
            .connections
            .get_mut(&id)
            .ok_or(RegistryError::UnknownConnection(id))?;
        member.username = username.to_string();

        let room = self.rooms.entry(room_id.to_string()).or_default();
        if room.members.contains(&id) {
            return Ok(JoinOutcome::AlreadyMember);
        }

        let outcome = if room.members.is_empty() {
            JoinOutcome::Created
        } else {
            JoinOutcome::Joined
        };
        room.members.insert(id);
        member.rooms.insert(room_id.to_string());
        Ok(outcome)
    }

    /// Ask one member of `room_id` for its buffer on behalf of `joiner`.
    ///
    /// Members are tried in join order and the first one whose outbox takes
    /// the `request-state` becomes the state source. The hand-off is recorded
    /// so only that member's `sync-state` will be accepted. `None` if no other
    /// member could be reached.
    pub fn request_state(&mut self, room_id: &str, joiner: ConnectionId) -> Option<ConnectionId> {
        let room = self.rooms.get(room_id)?;
        let connections = &self.connections;
        let source = room
            .members
            .iter()
            .copied()
            .filter(|id| *id != joiner)
            .find(|id| {
                connections.get(id).is_some_and(|member| {
                    member.send(ServerEvent::RequestState {
                        requester_id: joiner,
                    })
                })
            })?;
        self.handoffs.insert((joiner, source));
        Some(source)
    }

    /// Consume the hand-off `source -> target`. `false` if none is pending,
    /// i.e. `source` was never asked for state on `target`'s behalf.
    pub fn complete_handoff(&mut self, source: ConnectionId, target: ConnectionId) -> bool {
        self.handoffs.remove(&(target, source))
    }

    /// Number of hand-offs still waiting for a `sync-state`.
    pub fn pending_handoffs(&self) -> usize {
        self.handoffs.len()
    }

    /// Remove a connection from every room it is in, dropping rooms that end
    /// up empty. `None` if the connection was never registered.
    pub fn unregister(&mut self, id: ConnectionId) -> Option<Departure> {
        let member = self.connections.remove(&id)?;
        self.handoffs
            .retain(|&(target, source)| target != id && source != id);

        let exits = member
            .rooms
            .iter()
            .map(|room_id| {
                let closed = match self.rooms.get_mut(room_id) {
                    Some(room) => {
                        room.members.shift_remove(&id);
                        room.members.is_empty()
                    }
                    None => true,
                };
                if closed {
                    self.rooms.remove(room_id);
                }
                RoomExit {
                    room_id: room_id.clone(),
                    closed,
                }
            })
            .collect();

        Some(Departure { member, exits })
    }

    /// Store a member's latest selection.
    pub fn set_selection(&mut self, id: ConnectionId, selection: Selection) -> Option<&Member> {
        let member = self.connections.get_mut(&id)?;
        member.selection = selection;
        Some(member)
    }

    /// Visit every member of `room_id` in join order, skipping `except`.
    ///
    /// Returns the number of members visited; unknown rooms visit nobody.
    pub fn for_each_member<F>(&self, room_id: &str, except: Option<ConnectionId>, mut f: F) -> usize
    where
        F: FnMut(&Member),
    {
        let Some(room) = self.rooms.get(room_id) else {
            return 0;
        };
        let mut visited = 0;
        for id in room.members.iter().filter(|id| Some(**id) != except) {
            if let Some(member) = self.connections.get(id) {
                f(member);
                visited += 1;
            }
        }
        visited
    }

    /// Queue an event for one connection. `false` if it is unknown or gone.
    pub fn send_to(&self, id: ConnectionId, event: ServerEvent) -> bool {
        self.connections
            .get(&id)
            .is_some_and(|member| member.send(event))
    }

    /// Look up a registered connection.
    pub fn member(&self, id: &ConnectionId) -> Option<&Member> {
        self.connections.get(id)
    }

    /// `id` currently belongs to `room_id`.
    pub fn is_member(&self, room_id: &str, id: &ConnectionId) -> bool {
        self.rooms
            .get(room_id)
            .is_some_and(|room| room.members.contains(id))
    }

    /// A room exists only while it has members.
    pub fn contains_room(&self, room_id: &str) -> bool {
        self.rooms.contains_key(room_id)
    }

    /// Member ids of `room_id` in join order.
    pub fn members_of(&self, room_id: &str) -> Vec<ConnectionId> {
        self.rooms
            .get(room_id)
            .map(|room| room.members.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Number of live rooms.
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Number of registered connections, in a room or not.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn connect(registry: &mut RoomRegistry) -> (ConnectionId, UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        registry.register(id, tx);
        (id, rx)
    }

    #[test]
    fn test_first_join_creates_room() {
        let mut registry = RoomRegistry::new();
        let (a, _rx) = connect(&mut registry);

        assert_eq!(registry.join("notes", a, "alice"), Ok(JoinOutcome::Created));
        assert!(registry.contains_room("notes"));
        assert_eq!(registry.members_of("notes"), vec![a]);
        assert_eq!(registry.member(&a).unwrap().username, "alice");
    }

    #[test]
    fn test_second_join_asks_first_member_for_state() {
        let mut registry = RoomRegistry::new();
        let (a, mut ra) = connect(&mut registry);
        let (b, mut rb) = connect(&mut registry);
        let (c, _rc) = connect(&mut registry);

        registry.join("notes", a, "alice").unwrap();
        assert_eq!(registry.join("notes", b, "bob"), Ok(JoinOutcome::Joined));
        assert_eq!(registry.request_state("notes", b), Some(a));
        assert_eq!(registry.join("notes", c, "carol"), Ok(JoinOutcome::Joined));
        assert_eq!(registry.request_state("notes", c), Some(a));
        assert_eq!(registry.members_of("notes"), vec![a, b, c]);

        assert_eq!(ra.try_recv().unwrap(), ServerEvent::RequestState { requester_id: b });
        assert_eq!(ra.try_recv().unwrap(), ServerEvent::RequestState { requester_id: c });
        assert!(rb.try_recv().is_err());
        assert_eq!(registry.pending_handoffs(), 2);
    }

    #[test]
    fn test_request_state_skips_closed_outbox() {
        let mut registry = RoomRegistry::new();
        let (a, ra) = connect(&mut registry);
        let (b, mut rb) = connect(&mut registry);
        let (c, _rc) = connect(&mut registry);
        for (id, name) in [(a, "a"), (b, "b"), (c, "c")] {
            registry.join("notes", id, name).unwrap();
        }
        drop(ra);

        assert_eq!(registry.request_state("notes", c), Some(b));
        assert_eq!(rb.try_recv().unwrap(), ServerEvent::RequestState { requester_id: c });
        assert!(rb.try_recv().is_err());
    }

    #[test]
    fn test_request_state_with_no_live_member() {
        let mut registry = RoomRegistry::new();
        let (a, ra) = connect(&mut registry);
        let (b, _rb) = connect(&mut registry);
        registry.join("notes", a, "a").unwrap();
        registry.join("notes", b, "b").unwrap();
        drop(ra);

        assert_eq!(registry.request_state("notes", b), None);
        assert_eq!(registry.request_state("missing", b), None);
        assert_eq!(registry.pending_handoffs(), 0);
    }

    #[test]
    fn test_handoff_completes_once_and_only_for_its_source() {
        let mut registry = RoomRegistry::new();
        let (a, _ra) = connect(&mut registry);
        let (b, _rb) = connect(&mut registry);
        let (c, _rc) = connect(&mut registry);
        for (id, name) in [(a, "a"), (b, "b"), (c, "c")] {
            registry.join("notes", id, name).unwrap();
        }
        registry.request_state("notes", c);

        assert!(!registry.complete_handoff(b, c), "b was not asked");
        assert!(!registry.complete_handoff(c, a), "reversed direction");
        assert!(registry.complete_handoff(a, c));
        assert!(!registry.complete_handoff(a, c), "already answered");
        assert_eq!(registry.pending_handoffs(), 0);
    }

    #[test]
    fn test_unregister_drops_pending_handoffs() {
        let mut registry = RoomRegistry::new();
        let (a, _ra) = connect(&mut registry);
        let (b, _rb) = connect(&mut registry);
        let (c, _rc) = connect(&mut registry);
        registry.join("notes", a, "a").unwrap();
        registry.join("notes", b, "b").unwrap();
        registry.request_state("notes", b);
        registry.join("notes", c, "c").unwrap();
        registry.request_state("notes", c);
        assert_eq!(registry.pending_handoffs(), 2);

        // a was the source of both.
        registry.unregister(a);
        assert_eq!(registry.pending_handoffs(), 0);
    }

    #[test]
    fn test_rejoin_is_idempotent() {
        let mut registry = RoomRegistry::new();
        let (a, _ra) = connect(&mut registry);
        registry.join("notes", a, "alice").unwrap();

        assert_eq!(
            registry.join("notes", a, "alice2"),
            Ok(JoinOutcome::AlreadyMember)
        );
        assert_eq!(registry.members_of("notes"), vec![a]);
        assert_eq!(registry.member(&a).unwrap().username, "alice2");
    }

    #[test]
    fn test_join_unregistered_connection_fails() {
        let mut registry = RoomRegistry::new();
        let ghost = Uuid::new_v4();
        assert_eq!(
            registry.join("notes", ghost, "x"),
            Err(RegistryError::UnknownConnection(ghost))
        );
        assert!(!registry.contains_room("notes"));
    }

    #[test]
    fn test_color_fixed_across_joins() {
        let mut registry = RoomRegistry::new();
        let (a, _ra) = connect(&mut registry);
        let color = registry.member(&a).unwrap().color.clone();

        registry.join("one", a, "alice").unwrap();
        registry.join("two", a, "alice").unwrap();
        assert_eq!(registry.member(&a).unwrap().color, color);
        assert_eq!(color, color_for(a));
    }

    #[test]
    fn test_unregister_removes_from_every_room() {
        let mut registry = RoomRegistry::new();
        let (a, _ra) = connect(&mut registry);
        let (b, _rb) = connect(&mut registry);

        registry.join("one", a, "alice").unwrap();
        registry.join("two", a, "alice").unwrap();
        registry.join("two", b, "bob").unwrap();

        let departure = registry.unregister(a).unwrap();
        assert_eq!(departure.member.id, a);
        assert_eq!(
            departure.exits,
            vec![
                RoomExit { room_id: "one".into(), closed: true },
                RoomExit { room_id: "two".into(), closed: false },
            ]
        );
        assert!(!registry.contains_room("one"));
        assert_eq!(registry.members_of("two"), vec![b]);
        assert!(registry.member(&a).is_none());
        assert!(registry.unregister(a).is_none());
    }

    #[test]
    fn test_room_recreated_fresh_after_empty() {
        let mut registry = RoomRegistry::new();
        let (a, _ra) = connect(&mut registry);
        registry.join("notes", a, "alice").unwrap();
        registry.unregister(a);
        assert_eq!(registry.room_count(), 0);

        let (b, _rb) = connect(&mut registry);
        assert_eq!(registry.join("notes", b, "bob"), Ok(JoinOutcome::Created));
    }

    #[test]
    fn test_for_each_member_skips_sender() {
        let mut registry = RoomRegistry::new();
        let (a, _ra) = connect(&mut registry);
        let (b, _rb) = connect(&mut registry);
        let (c, _rc) = connect(&mut registry);
        for (id, name) in [(a, "a"), (b, "b"), (c, "c")] {
            registry.join("notes", id, name).unwrap();
        }

        let mut seen = Vec::new();
        let visited = registry.for_each_member("notes", Some(b), |m| seen.push(m.id));
        assert_eq!(visited, 2);
        assert_eq!(seen, vec![a, c]);

        assert_eq!(registry.for_each_member("missing", None, |_| {}), 0);
    }

    #[test]
    fn test_send_to_delivers_event() {
        let mut registry = RoomRegistry::new();
        let (a, mut ra) = connect(&mut registry);

        assert!(registry.send_to(a, ServerEvent::Pong));
        assert_eq!(ra.try_recv().unwrap(), ServerEvent::Pong);
        assert!(!registry.send_to(Uuid::new_v4(), ServerEvent::Pong));
    }

    #[test]
    fn test_send_to_closed_outbox_fails() {
        let mut registry = RoomRegistry::new();
        let (a, ra) = connect(&mut registry);
        drop(ra);
        assert!(!registry.send_to(a, ServerEvent::Pong));
    }

    #[test]
    fn test_set_selection() {
        let mut registry = RoomRegistry::new();
        let (a, _ra) = connect(&mut registry);
        assert_eq!(registry.member(&a).unwrap().selection, Selection::caret(0));

        let member = registry.set_selection(a, Selection::new(3, 8)).unwrap();
        assert_eq!(member.selection, Selection::new(3, 8));
        assert!(registry.set_selection(Uuid::new_v4(), Selection::caret(1)).is_none());
    }
}
