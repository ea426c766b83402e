//! The ingestion pipeline: read → parse → claim delta → format → append.
//!
//! A [`Pipeline`] owns the session state for one watcher run. It is shared
//! between debounced tasks behind an `Arc`; the store sits behind a mutex
//! that is held only while the delta is claimed, never while writing.
//!
//! Claiming and appending for one session are additionally serialized by a
//! per-session gate, so a later read can never write its turns ahead of an
//! earlier read that is still appending.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use crate::appender::LogAppender;
use crate::delta::{claim_delta, record_baseline};
use crate::format::TurnFormatter;
use crate::session::{read_session_file, SessionDocument};
use crate::state::{KeyPolicy, SessionKey, SessionStateStore};

/// Result of running one file through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The file could not be read (usually mid-write; retried on the next event).
    Unreadable,
    /// The file is not a chat session.
    NotASession,
    /// The session has no turns beyond what was already emitted.
    NoNewTurns,
    /// New turns were claimed. `written` entries reached the log, `failed`
    /// could not be written and are dropped for this run; the rest were empty.
    Emitted {
        turns: usize,
        written: usize,
        failed: usize,
    },
    /// Initial-scan mode without backfill: `turns` were marked as seen.
    Baselined { turns: usize },
}

pub struct Pipeline {
    store: Mutex<SessionStateStore>,
    gates: Mutex<HashMap<SessionKey, Arc<Mutex<()>>>>,
    reads: AtomicUsize,
    formatter: TurnFormatter,
    appender: LogAppender,
    key_policy: KeyPolicy,
    default_name: String,
}

impl Pipeline {
    pub fn new(
        formatter: TurnFormatter,
        appender: LogAppender,
        key_policy: KeyPolicy,
        default_name: impl Into<String>,
    ) -> Self {
        Self {
            store: Mutex::new(SessionStateStore::new()),
            gates: Mutex::new(HashMap::new()),
            reads: AtomicUsize::new(0),
            formatter,
            appender,
            key_policy,
            default_name: default_name.into(),
        }
    }

    pub fn appender(&self) -> &LogAppender {
        &self.appender
    }

    /// Number of sessions seen so far.
    pub fn tracked_sessions(&self) -> usize {
        self.lock_store().len()
    }

    /// Number of times a file has been read, whether or not it was a session.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }

    /// Read `path` and emit any turns not yet logged.
    pub fn process_file(&self, path: &Path) -> ProcessOutcome {
        match self.load(path) {
            Ok((path, doc)) => self.process_document(&path, &doc),
            Err(outcome) => outcome,
        }
    }

    /// Read `path` and mark all its current turns as seen without writing.
    pub fn baseline_file(&self, path: &Path) -> ProcessOutcome {
        let (path, doc) = match self.load(path) {
            Ok(loaded) => loaded,
            Err(outcome) => return outcome,
        };
        let mut store = self.lock_store();
        let key = store.key_for(self.key_policy, &path, &doc);
        record_baseline(&mut store, &key, &doc.turns, SystemTime::now());
        drop(store);
        tracing::debug!(session = %key, turns = doc.turns.len(), "recorded baseline");
        ProcessOutcome::Baselined {
            turns: doc.turns.len(),
        }
    }

    /// Emit the unseen turns of an already-parsed document.
    ///
    /// `path` should be canonical; it is the session key under the default
    /// policy.
    pub fn process_document(&self, path: &Path, doc: &SessionDocument) -> ProcessOutcome {
        let key = self.lock_store().key_for(self.key_policy, path, doc);

        // Held until every claimed turn is appended.
        let gate = self.gate(&key);
        let _in_order = gate.lock().unwrap_or_else(PoisonError::into_inner);

        // The guard is a temporary: the store is unlocked before any I/O.
        let delta = claim_delta(&mut self.lock_store(), &key, &doc.turns, SystemTime::now());
        if delta.is_empty() {
            return ProcessOutcome::NoNewTurns;
        }

        let name = doc.display_name(&self.default_name);
        let mut written = 0;
        let mut failed = 0;

        for turn in delta {
            let entry = self.formatter.format_turn(turn);
            if entry.is_empty() {
                continue;
            }
            match self.appender.append(&name, entry) {
                Ok(log_file) => {
                    written += 1;
                    tracing::debug!(log_file = %log_file.display(), "appended entry");
                }
                Err(e) => {
                    failed += 1;
                    tracing::error!(session = %key, error = %e, "failed to write log entry");
                }
            }
        }

        tracing::info!(
            session = %key,
            new_turns = delta.len(),
            written,
            "logged new turns"
        );

        ProcessOutcome::Emitted {
            turns: delta.len(),
            written,
            failed,
        }
    }

    fn load(&self, path: &Path) -> Result<(PathBuf, SessionDocument), ProcessOutcome> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        match read_session_file(&path) {
            Ok(Some(doc)) => Ok((path, doc)),
            Ok(None) => {
                tracing::trace!(path = %path.display(), "not a chat session");
                Err(ProcessOutcome::NotASession)
            }
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "could not read session file");
                Err(ProcessOutcome::Unreadable)
            }
        }
    }

    fn gate(&self, key: &SessionKey) -> Arc<Mutex<()>> {
        let mut gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(gates.entry(key.clone()).or_default())
    }

    fn lock_store(&self) -> MutexGuard<'_, SessionStateStore> {
        // A panic elsewhere cannot leave the map half-updated; keep going.
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
