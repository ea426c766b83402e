//! Incremental turn extraction.
//!
//! Given the turns currently in a session file and the progress recorded
//! for it, yield only the turns that have not been emitted yet. A session
//! that shrinks (rollback, rewrite, corruption) yields nothing and its
//! marker is left untouched, so a turn index is never emitted twice.

use std::time::SystemTime;

use crate::session::Turn;
use crate::state::{ProgressMarker, SessionKey, SessionStateStore};

/// The unseen suffix of `turns`, given the previous progress.
///
/// An absent marker means nothing has been emitted yet.
pub fn extract_delta<'a>(turns: &'a [Turn], marker: Option<&ProgressMarker>) -> &'a [Turn] {
    let previous = marker.map_or(0, |m| m.count);
    turns.get(previous..).unwrap_or(&[])
}

/// Extract the delta for `key` and advance its marker in one step.
///
/// The caller must hold exclusive access to `store` for the duration of
/// the call; that makes read-progress, extract and write-progress a single
/// critical section per session. A marker is created on first sight, even
/// for a session with no turns; after that it only moves forward, and only
/// when new turns were found.
pub fn claim_delta<'a>(
    store: &mut SessionStateStore,
    key: &SessionKey,
    turns: &'a [Turn],
    now: SystemTime,
) -> &'a [Turn] {
    let marker = store.get_progress(key);
    let first_sight = marker.is_none();
    let delta = extract_delta(turns, marker);
    if first_sight || !delta.is_empty() {
        store.set_progress(key.clone(), turns.len(), now);
    }
    delta
}

/// Record `turns.len()` as already emitted without yielding anything.
///
/// Used by the initial scan when existing history should not be written.
/// Returns `true` if the marker advanced.
pub fn record_baseline(
    store: &mut SessionStateStore,
    key: &SessionKey,
    turns: &[Turn],
    now: SystemTime,
) -> bool {
    let previous = store.get_progress(key).map(|m| m.count);
    match previous {
        Some(count) if turns.len() <= count => false,
        _ => {
            store.set_progress(key.clone(), turns.len(), now);
            turns.len() > previous.unwrap_or(0)
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
