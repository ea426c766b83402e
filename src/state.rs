//! Per-session progress tracking.
//!
//! The store remembers, for each session it has seen, how many turns have
//! already been written to a log. It lives only as long as the watcher
//! that owns it: nothing is persisted, so a fresh process re-establishes
//! every baseline on its initial scan.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::session::SessionDocument;

// ---------------------------------------------------------------------------
// Session identity
// ---------------------------------------------------------------------------

/// Which identity a session is tracked under.
///
/// `FilePath` is the default: the path of a session file never changes
/// while it is being written, whereas the embedded id may appear late.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum KeyPolicy {
    #[default]
    FilePath,
    /// Prefer the embedded `sessionId`, falling back to the path.
    SessionId,
}

/// Identity under which progress is recorded.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SessionKey {
    Path(PathBuf),
    Id(String),
}

impl SessionKey {
    /// Derive the key for a document read from `path` under `policy`.
    ///
    /// `path` should already be canonical so that the same file always
    /// maps to the same key.
    pub fn for_document(policy: KeyPolicy, path: &Path, doc: &SessionDocument) -> Self {
        match (policy, doc.session_id.as_deref()) {
            (KeyPolicy::SessionId, Some(id)) if !id.is_empty() => SessionKey::Id(id.to_string()),
            _ => SessionKey::Path(path.to_path_buf()),
        }
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionKey::Path(p) => write!(f, "{}", p.display()),
            SessionKey::Id(id) => write!(f, "session {}", id),
        }
    }
}

// ---------------------------------------------------------------------------
// Progress marker and store
// ---------------------------------------------------------------------------

/// How far a session has been emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressMarker {
    /// Number of turns already written.
    pub count: usize,
    /// Wall-clock time of the last update.
    pub updated_at: SystemTime,
}

/// In-memory map from session identity to progress.
///
/// Each file is bound to the key it was first tracked under, so a file
/// that gains a `sessionId` later keeps its original identity.
#[derive(Debug, Default)]
pub struct SessionStateStore {
    progress: HashMap<SessionKey, ProgressMarker>,
    identities: HashMap<PathBuf, SessionKey>,
}

impl SessionStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The key `path` is tracked under, derived from `doc` on first sight.
    pub fn key_for(
        &mut self,
        policy: KeyPolicy,
        path: &Path,
        doc: &SessionDocument,
    ) -> SessionKey {
        self.identities
            .entry(path.to_path_buf())
            .or_insert_with(|| SessionKey::for_document(policy, path, doc))
            .clone()
    }

    pub fn get_progress(&self, key: &SessionKey) -> Option<&ProgressMarker> {
        self.progress.get(key)
    }

    /// Overwrite the marker for `key` unconditionally.
    pub fn set_progress(&mut self, key: SessionKey, count: usize, time: SystemTime) {
        self.progress.insert(
            key,
            ProgressMarker {
                count,
                updated_at: time,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.progress.len()
    }

    pub fn is_empty(&self) -> bool {
        self.progress.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
