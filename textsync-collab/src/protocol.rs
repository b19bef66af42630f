//! JSON event protocol for plain-text relay synchronization.
//!
//! Wire format (one WebSocket text frame per event):
//! ```text
//! {"event": "text-change", "data": {"roomId": "notes", "delta": {"start": 5, "end": 5, "text": " World"}}}
//! └──────── kebab-case ──┘ └──────────────────── camelCase payload ─────────────────────────────┘
//! ```
//!
//! The only unit of content replication is [`Delta`]; there are no separate
//! insert/delete messages. Offsets count `char`s, never bytes.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Replace the half-open char range `[start, end)` with `text`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta {
    pub start: usize,
    pub end: usize,
    pub text: String,
}

impl Delta {
    /// Replace `[start, end)` with `text`.
    pub fn new(start: usize, end: usize, text: impl Into<String>) -> Self {
        Self {
            start,
            end,
            text: text.into(),
        }
    }

    /// Pure insertion at `at`.
    pub fn insert(at: usize, text: impl Into<String>) -> Self {
        Self::new(at, at, text)
    }

    /// `start == end` and nothing inserted.
    pub fn is_noop(&self) -> bool {
        self.start == self.end && self.text.is_empty()
    }

    /// Length of the inserted text in chars.
    pub fn inserted_len(&self) -> usize {
        self.text.chars().count()
    }

    /// Net change in buffer length, in chars.
    pub fn len_change(&self) -> isize {
        self.inserted_len() as isize - (self.end as isize - self.start as isize)
    }

    /// Check the range against a buffer of `len` chars.
    pub fn validate(&self, len: usize) -> Result<(), DeltaError> {
        if self.start > self.end {
            return Err(DeltaError::InvertedRange {
                start: self.start,
                end: self.end,
            });
        }
        if self.end > len {
            return Err(DeltaError::OutOfBounds { end: self.end, len });
        }
        Ok(())
    }

    /// Apply to `buffer`, returning the new text.
    ///
    /// The buffer is left untouched on error.
    pub fn apply(&self, buffer: &str) -> Result<String, DeltaError> {
        let len = buffer.chars().count();
        self.validate(len)?;

        let start = char_to_byte(buffer, self.start);
        let end = char_to_byte(buffer, self.end);

        let mut out = String::with_capacity(buffer.len() - (end - start) + self.text.len());
        out.push_str(&buffer[..start]);
        out.push_str(&self.text);
        out.push_str(&buffer[end..]);
        Ok(out)
    }
}

/// Byte index of the `idx`-th char; `buffer.len()` when `idx` is past the end.
pub(crate) fn char_to_byte(buffer: &str, idx: usize) -> usize {
    buffer
        .char_indices()
        .nth(idx)
        .map_or(buffer.len(), |(byte, _)| byte)
}

/// Events a participant sends to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ClientEvent {
    JoinRoom {
        room_id: String,
        username: String,
    },
    /// Answer to a `request-state`, carrying the full buffer.
    SyncState {
        target_id: Uuid,
        content: String,
    },
    TextChange {
        room_id: String,
        delta: Delta,
    },
    CursorMove {
        room_id: String,
        selection_start: usize,
        selection_end: usize,
    },
    Ping,
}

/// Events the relay sends to participants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    /// Ask an existing member for its buffer on behalf of `requester_id`.
    RequestState {
        requester_id: Uuid,
    },
    /// Relayed `sync-state`, delivered to the joining member only.
    ReceiveState {
        content: String,
    },
    RemoteChange {
        sender_id: Uuid,
        delta: Delta,
    },
    RemoteCursor {
        id: Uuid,
        selection_start: usize,
        selection_end: usize,
        color: String,
        username: String,
    },
    UserJoined {
        id: Uuid,
        color: String,
        username: String,
    },
    UserLeft {
        id: Uuid,
    },
    Pong,
}

impl ClientEvent {
    /// Serialize to a JSON text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    /// Parse a JSON text frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::DeserializationError(e.to_string()))
    }

    /// Wire name of the event, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::JoinRoom { .. } => "join-room",
            ClientEvent::SyncState { .. } => "sync-state",
            ClientEvent::TextChange { .. } => "text-change",
            ClientEvent::CursorMove { .. } => "cursor-move",
            ClientEvent::Ping => "ping",
        }
    }
}

impl ServerEvent {
    /// Serialize to a JSON text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    /// Parse a JSON text frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::DeserializationError(e.to_string()))
    }
}

/// Protocol errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Deserialization error: {0}")]
    DeserializationError(String),
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Transport error: {0}")]
    Transport(String),
}

/// A delta that cannot be applied to the local buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeltaError {
    #[error("delta range is inverted: start {start} > end {end}")]
    InvertedRange { start: usize, end: usize },
    #[error("delta end {end} exceeds buffer length {len}")]
    OutOfBounds { end: usize, len: usize },
}
