//! Client-local shared buffer.
//!
//! One `SharedDocument` per open document, driven by a single event loop:
//!
//! ```text
//! local keystroke ──► edit() ──► Delta ──────────────► text-change
//! selection change ─► select() ──────────────────────► cursor-move
//! server event ─────► handle() ─► apply_remote()       (remote-change)
//!                               ─► PresenceTracker      (joins, cursors, leaves)
//!                               ─► sync-state reply     (request-state)
//!                               ─► replace buffer       (receive-state)
//! ```
//!
//! No locking: the buffer has exactly one writer. Concurrent edits to
//! overlapping ranges from different peers are applied in arrival order and
//! may leave peers with different text; nothing here merges them.

use uuid::Uuid;

use crate::cursor::Selection;
use crate::diff::diff;
use crate::presence::PresenceTracker;
use crate::protocol::{ClientEvent, Delta, DeltaError, ServerEvent};

/// A room's text as seen by one participant.
#[derive(Debug)]
pub struct SharedDocument {
    room_id: String,
    text: String,
    /// Cached `text.chars().count()`.
    len: usize,
    selection: Selection,
    presence: PresenceTracker,
    out_of_sync: bool,
}

impl SharedDocument {
    /// Empty buffer, as a joiner starts before any state hand-off.
    pub fn new(room_id: impl Into<String>) -> Self {
        Self::with_text(room_id, String::new())
    }

    /// Buffer seeded with existing content.
    pub fn with_text(room_id: impl Into<String>, text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            room_id: room_id.into(),
            len: text.chars().count(),
            text,
            selection: Selection::default(),
            presence: PresenceTracker::new(),
            out_of_sync: false,
        }
    }

    /// Record a local edit that produced `new_text`.
    ///
    /// Returns the delta to send, or `None` if nothing changed. The local
    /// selection and cached remote selections follow the edit.
    pub fn edit(&mut self, new_text: impl Into<String>) -> Option<Delta> {
        let new_text = new_text.into();
        let delta = diff(&self.text, &new_text)?;

        self.selection = self.selection.transform(&delta);
        self.presence.transform_all(&delta);
        self.len = new_text.chars().count();
        self.text = new_text;
        Some(delta)
    }

    /// Record a local edit and wrap it as a `text-change` event.
    pub fn edit_event(&mut self, new_text: impl Into<String>) -> Option<ClientEvent> {
        let delta = self.edit(new_text)?;
        Some(ClientEvent::TextChange {
            room_id: self.room_id.clone(),
            delta,
        })
    }

    /// Move the local selection and build the `cursor-move` announcing it.
    pub fn select(&mut self, start: usize, end: usize) -> ClientEvent {
        self.selection = Selection::new(start, end).clamp(self.len);
        ClientEvent::CursorMove {
            room_id: self.room_id.clone(),
            selection_start: self.selection.start,
            selection_end: self.selection.end,
        }
    }

    /// Apply a delta received from another participant.
    ///
    /// A delta that does not fit the buffer leaves it untouched and marks the
    /// document out of sync until the next full state arrives.
    pub fn apply_remote(&mut self, delta: &Delta) -> Result<(), DeltaError> {
        match delta.apply(&self.text) {
            Ok(text) => {
                self.selection = self.selection.transform(delta);
                self.presence.transform_all(delta);
                self.len = text.chars().count();
                self.text = text;
                Ok(())
            }
            Err(e) => {
                self.out_of_sync = true;
                Err(e)
            }
        }
    }

    /// Replace the whole buffer with content handed over by a peer.
    pub fn load_state(&mut self, content: String) {
        self.len = content.chars().count();
        self.text = content;
        self.selection = self.selection.clamp(self.len);
        self.out_of_sync = false;
    }

    /// Process one server event. Returns an event to send back, if any.
    ///
    /// Faults never escape: a bad delta is logged and flags the buffer.
    pub fn handle(&mut self, event: ServerEvent) -> Option<ClientEvent> {
        match event {
            ServerEvent::RemoteChange { sender_id, delta } => {
                if let Err(e) = self.apply_remote(&delta) {
                    log::warn!(
                        "Rejected delta from {sender_id} in room {}: {e}; buffer out of sync",
                        self.room_id
                    );
                }
                None
            }

            ServerEvent::RequestState { requester_id } => Some(self.state_for(requester_id)),

            ServerEvent::ReceiveState { content } => {
                log::debug!(
                    "Loaded {} chars of state for room {}",
                    content.chars().count(),
                    self.room_id
                );
                self.load_state(content);
                None
            }

            ServerEvent::Pong => None,

            presence => {
                self.presence.handle(&presence);
                None
            }
        }
    }

    /// The `sync-state` answer carrying the full buffer for `requester_id`.
    pub fn state_for(&self, requester_id: Uuid) -> ClientEvent {
        ClientEvent::SyncState {
            target_id: requester_id,
            content: self.text.clone(),
        }
    }

    /// Current buffer content.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Buffer length in chars.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Buffer holds no text.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Local selection, in chars.
    pub fn selection(&self) -> Selection {
        self.selection
    }

    /// Remote participants seen so far.
    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    /// Room this buffer belongs to.
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// A remote delta was rejected since the last full state.
    pub fn is_out_of_sync(&self) -> bool {
        self.out_of_sync
    }
}
