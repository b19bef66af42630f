//! Presence for remote participants: who is in the room, their color, and
//! where their selection is.
//!
//! ```text
//! user-joined ──┐
//! remote-cursor ├──► PresenceTracker::handle() ──► peers() / cursors() ──► UI
//! user-left ────┘
//! ```
//!
//! The tracker is a cached mirror for rendering only. It reflects the latest
//! event per identity and owns nothing authoritative.

use std::collections::HashMap;

use uuid::Uuid;

use crate::cursor::Selection;
use crate::protocol::{Delta, ServerEvent};

// ───────────────────────────────────────────────────────────────────
// Colors
// ───────────────────────────────────────────────────────────────────

/// Display color for a connection, as `#rrggbb`.
///
/// Hue comes from the connection id, which is random per connection, so the
/// color is pseudo-random but fixed for the lifetime of that connection.
pub fn color_for(id: Uuid) -> String {
    let hue = (id.as_u128() % 360) as f32 / 360.0;
    let (r, g, b) = hsl_to_rgb(hue, 0.7, 0.5);
    format!(
        "#{:02x}{:02x}{:02x}",
        to_channel(r),
        to_channel(g),
        to_channel(b)
    )
}

fn to_channel(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

fn hsl_to_rgb(h: f32, s: f32, l: f32) -> (f32, f32, f32) {
    if s == 0.0 {
        return (l, l, l);
    }

    let q = if l < 0.5 { l * (1.0 + s) } else { l + s - l * s };
    let p = 2.0 * l - q;

    (
        hue_to_rgb(p, q, h + 1.0 / 3.0),
        hue_to_rgb(p, q, h),
        hue_to_rgb(p, q, h - 1.0 / 3.0),
    )
}

fn hue_to_rgb(p: f32, q: f32, mut t: f32) -> f32 {
    if t < 0.0 {
        t += 1.0;
    }
    if t > 1.0 {
        t -= 1.0;
    }
    if t < 1.0 / 6.0 {
        return p + (q - p) * 6.0 * t;
    }
    if t < 1.0 / 2.0 {
        return q;
    }
    if t < 2.0 / 3.0 {
        return p + (q - p) * (2.0 / 3.0 - t) * 6.0;
    }
    p
}

// ───────────────────────────────────────────────────────────────────
// Remote peers
// ───────────────────────────────────────────────────────────────────

/// Last known state of one remote participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePeer {
    pub id: Uuid,
    pub username: String,
    pub color: String,
    pub selection: Selection,
}

/// Data needed to draw one remote caret/selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorRenderData {
    pub id: Uuid,
    pub username: String,
    pub color: String,
    pub selection: Selection,
}

/// Local mirror of the other members of a room.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    peers: HashMap<Uuid, RemotePeer>,
}

impl PresenceTracker {
    /// Tracker with no peers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a presence event. Returns `true` if the mirror changed.
    ///
    /// Content events are ignored.
    pub fn handle(&mut self, event: &ServerEvent) -> bool {
        match event {
            ServerEvent::UserJoined {
                id,
                color,
                username,
            } => {
                // A join resets the selection; remote-cursor carries it later.
                self.peers.insert(
                    *id,
                    RemotePeer {
                        id: *id,
                        username: username.clone(),
                        color: color.clone(),
                        selection: Selection::default(),
                    },
                );
                true
            }

            ServerEvent::RemoteCursor {
                id,
                selection_start,
                selection_end,
                color,
                username,
            } => {
                // Peers that were present before we joined never sent us a
                // user-joined, so their first cursor event creates the entry.
                let peer = self.peers.entry(*id).or_insert_with(|| RemotePeer {
                    id: *id,
                    username: username.clone(),
                    color: color.clone(),
                    selection: Selection::default(),
                });
                peer.username = username.clone();
                peer.color = color.clone();
                peer.selection = Selection::new(*selection_start, *selection_end);
                true
            }

            ServerEvent::UserLeft { id } => self.peers.remove(id).is_some(),

            _ => false,
        }
    }

    /// Shift every cached remote selection through a delta applied locally.
    ///
    /// Keeps remote carets anchored to the same text until their owners send
    /// a fresh `remote-cursor`.
    pub fn transform_all(&mut self, delta: &Delta) {
        for peer in self.peers.values_mut() {
            peer.selection = peer.selection.transform(delta);
        }
    }

    /// Look up one peer.
    pub fn peer(&self, id: &Uuid) -> Option<&RemotePeer> {
        self.peers.get(id)
    }

    /// All known peers, unordered.
    pub fn peers(&self) -> impl Iterator<Item = &RemotePeer> {
        self.peers.values()
    }

    /// Number of known peers.
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// No remote participant is known.
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Forget every peer, e.g. after a reconnect.
    pub fn clear(&mut self) {
        self.peers.clear();
    }

    /// Render data for every peer, clamped to a buffer of `len` chars and
    /// ordered by username so the overlay draws in a stable order.
    pub fn cursors(&self, len: usize) -> Vec<CursorRenderData> {
        let mut cursors: Vec<CursorRenderData> = self
            .peers
            .values()
            .map(|p| CursorRenderData {
                id: p.id,
                username: p.username.clone(),
                color: p.color.clone(),
                selection: p.selection.clamp(len),
            })
            .collect();
        cursors.sort_by(|a, b| a.username.cmp(&b.username).then(a.id.cmp(&b.id)));
        cursors
    }
}
