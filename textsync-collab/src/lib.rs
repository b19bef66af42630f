//! # textsync-collab — Real-time plain-text collaboration over a thin relay
//!
//! Several clients edit one shared text buffer. The server only relays
//! events between members of a room; the document lives in each client's
//! memory.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────┐   text-change    ┌─────────────┐   remote-change   ┌────────────────┐
//! │ SharedDocument │ ───────────────► │   Relay     │ ────────────────► │ SharedDocument │
//! │  diff → Delta  │   cursor-move    │ RoomRegistry│   remote-cursor   │ apply + cursor │
//! │  (client A)    │ ◄─────────────── │ (no text)   │ ◄──────────────── │  (client B)    │
//! └────────────────┘   request-state  └─────────────┘   sync-state      └────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — `Delta` and the JSON event envelope
//! - [`diff`] — minimal replace-delta between two snapshots
//! - [`cursor`] — selection transform under a remote delta
//! - [`presence`] — remote participants' colors, names and selections
//! - [`registry`] — room membership with join-order iteration
//! - [`relay`] — event coordination and join-time state hand-off
//! - [`server`] — WebSocket relay server
//! - [`client`] — WebSocket client
//! - [`document`] — client-local buffer tying the above together
//!
//! ## Known limitation
//!
//! Deltas are applied in arrival order without transformation against each
//! other. Two peers editing overlapping ranges at the same moment can end up
//! with different text.

pub mod protocol;
pub mod diff;
pub mod cursor;
pub mod presence;
pub mod registry;
pub mod relay;
pub mod server;
pub mod client;
pub mod document;

// Re-exports for convenience
pub use protocol::{ClientEvent, Delta, DeltaError, ProtocolError, ServerEvent};
pub use diff::{compute_delta, diff};
pub use cursor::{transform_offset, Selection};
pub use presence::{color_for, CursorRenderData, PresenceTracker, RemotePeer};
pub use registry::{ConnectionId, Departure, JoinOutcome, Member, RoomExit, RoomRegistry};
pub use relay::Relay;
pub use server::{ServerConfig, ServerStats, SyncServer};
pub use client::{ConnectionState, SyncClient, SyncEvent};
pub use document::SharedDocument;
