//! Minimal replace-delta between two snapshots of a buffer.
//!
//! ```text
//! previous:  H e l l o _ W o r l d
//!            └─prefix─┘ ↑ └suffix─┘
//! current:   H e l l o   W o r l d
//!                       start=5, end=6, text=""
//! ```
//!
//! The longest common prefix wins first; the suffix scan then stops before it
//! would overlap the prefix in either string. One mutation of any kind
//! (append, prepend, insert, delete, replace) reduces to one delta.

use crate::protocol::{char_to_byte, Delta};

/// Compute the delta that turns `previous` into `current`.
///
/// Identical inputs yield a no-op delta (`start == end`, empty text).
pub fn compute_delta(previous: &str, current: &str) -> Delta {
    let prev_len = previous.chars().count();
    let cur_len = current.chars().count();

    let prefix = previous
        .chars()
        .zip(current.chars())
        .take_while(|(a, b)| a == b)
        .count();

    // Bounded so neither string's suffix reaches into the matched prefix.
    let max_suffix = (prev_len - prefix).min(cur_len - prefix);
    let suffix = previous
        .chars()
        .rev()
        .zip(current.chars().rev())
        .take(max_suffix)
        .take_while(|(a, b)| a == b)
        .count();

    let text_start = char_to_byte(current, prefix);
    let text_end = char_to_byte(current, cur_len - suffix);

    Delta {
        start: prefix,
        end: prev_len - suffix,
        text: current[text_start..text_end].to_string(),
    }
}

/// Like [`compute_delta`] but returns `None` when nothing changed.
pub fn diff(previous: &str, current: &str) -> Option<Delta> {
    let delta = compute_delta(previous, current);
    (!delta.is_noop()).then_some(delta)
}
