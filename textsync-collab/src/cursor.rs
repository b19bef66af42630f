//! Keeps a local selection stable when a remote delta lands in the buffer.
//!
//! Each endpoint `o` is mapped independently, from the pre-delta values:
//!
//! | Position              | New offset                           |
//! |-----------------------|--------------------------------------|
//! | `o > end`             | `o + len(text) - (end - start)`      |
//! | `start < o <= end`    | `start + len(text)`                  |
//! | `o <= start`          | `o`                                  |
//!
//! A cursor sitting exactly at an insertion point stays put. That keeps
//! "someone typed right before my cursor" distinguishable from "I typed at my
//! cursor".

use serde::{Deserialize, Serialize};

use crate::protocol::Delta;

/// A selection range in chars. `start > end` is allowed (backwards selection).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Selection {
    pub start: usize,
    pub end: usize,
}

impl Selection {
    /// Selection from `start` to `end`, either orientation.
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Collapsed selection (a caret) at `at`.
    pub fn caret(at: usize) -> Self {
        Self { start: at, end: at }
    }

    /// No text selected, just a caret.
    pub fn is_collapsed(&self) -> bool {
        self.start == self.end
    }

    /// Map both endpoints through `delta`.
    pub fn transform(&self, delta: &Delta) -> Selection {
        let inserted = delta.inserted_len();
        Selection {
            start: transform_offset(self.start, delta.start, delta.end, inserted),
            end: transform_offset(self.end, delta.start, delta.end, inserted),
        }
    }

    /// Clamp both endpoints into a buffer of `len` chars.
    pub fn clamp(&self, len: usize) -> Selection {
        Selection {
            start: self.start.min(len),
            end: self.end.min(len),
        }
    }
}

/// Map one offset through a replacement of `[start, end)` by `inserted` chars.
pub fn transform_offset(offset: usize, start: usize, end: usize, inserted: usize) -> usize {
    if offset > end {
        // offset > end >= removed, so this never underflows.
        offset - end.saturating_sub(start) + inserted
    } else if offset > start {
        start + inserted
    } else {
        offset
    }
}
