//! Change detection for chat session files.
//!
//! [`ChangeWatcher`] runs the ingestion pipeline for every session file
//! under a root directory:
//!
//! 1. On [`start`](ChangeWatcher::start) it walks the tree once and feeds
//!    every candidate file through the pipeline, establishing baselines.
//! 2. It then listens for `notify` create/modify events. Each event is
//!    debounced per path: a newer event for the same file replaces the
//!    pending one, so a burst of writes results in a single re-read.
//! 3. [`stop`](ChangeWatcher::stop) releases the OS watch handle and
//!    cancels pending timers. A job that has already started reading or
//!    appending runs to completion.
//!
//! The directory walk follows symlinks but tracks visited real paths, so
//! cycles terminate, and ignores anything that resolves outside the root.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::pipeline::{Pipeline, ProcessOutcome};

/// Default delay between the last event for a file and its re-read.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(100);

/// Default suffix of session file names.
pub const DEFAULT_FILE_SUFFIX: &str = ".json";

/// Default bound on directory nesting during the initial scan.
pub const DEFAULT_MAX_DEPTH: usize = 16;

// ---------------------------------------------------------------------------
// Settings, state and errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchSettings {
    pub debounce: Duration,
    pub file_suffix: String,
    /// Emit existing history on the initial scan. When `false` the scan
    /// only records baselines and just turns added afterwards are logged.
    pub backfill: bool,
    pub max_depth: usize,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            file_suffix: DEFAULT_FILE_SUFFIX.to_string(),
            backfill: true,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

/// Lifecycle of a [`ChangeWatcher`]. `Stopped` is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    Unstarted,
    Watching,
    Stopped,
}

#[derive(Debug, thiserror::Error)]
pub enum WatcherError {
    #[error("watch root not found: {}", .0.display())]
    RootNotFound(PathBuf),
    #[error("filesystem watcher error: {0}")]
    Notify(#[from] notify::Error),
    #[error("watcher is already running")]
    AlreadyStarted,
    #[error("watcher has been stopped and cannot be restarted")]
    Stopped,
}

/// Counts from the initial scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    /// Candidate files found.
    pub files: usize,
    /// Files that parsed as chat sessions.
    pub sessions: usize,
    /// Turns written (backfill) or marked as seen (baseline only).
    pub turns: usize,
}

// ---------------------------------------------------------------------------
// Candidate detection
// ---------------------------------------------------------------------------

/// Returns `true` if the file name ends with `suffix`.
pub fn is_session_candidate(path: &Path, suffix: &str) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|name| name.len() > suffix.len() && name.ends_with(suffix))
}

/// Candidate paths carried by a create/modify event. Other event kinds
/// (access, remove) yield nothing.
pub(crate) fn event_paths(event: &Event, suffix: &str) -> Vec<PathBuf> {
    match event.kind {
        EventKind::Create(_) | EventKind::Modify(_) => event
            .paths
            .iter()
            .filter(|p| is_session_candidate(p, suffix))
            .cloned()
            .collect(),
        _ => Vec::new(),
    }
}

/// Canonicalize `path` and check that it stays inside `root` (already
/// canonical). Returns `None` for vanished files and symlink escapes.
fn resolve_within_root(path: &Path, root: &Path) -> Option<PathBuf> {
    match path.canonicalize() {
        Ok(canonical) if canonical.starts_with(root) => Some(canonical),
        Ok(canonical) => {
            tracing::debug!(
                path = %path.display(),
                resolved = %canonical.display(),
                "ignoring path outside watch root"
            );
            None
        }
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "could not resolve path");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Initial scan
// ---------------------------------------------------------------------------

/// Collect every candidate file under `root`, sorted.
///
/// The walk is iterative with a visited set of canonical directory paths,
/// descends at most `max_depth` levels, and skips entries that resolve
/// outside `root`. Unreadable directories are logged and skipped.
pub fn scan_tree(root: &Path, suffix: &str, max_depth: usize) -> Vec<PathBuf> {
    let Ok(root) = root.canonicalize() else {
        return Vec::new();
    };

    let mut found = Vec::new();
    let mut visited: HashSet<PathBuf> = HashSet::new();
    let mut stack: Vec<(PathBuf, usize)> = vec![(root.clone(), 0)];

    while let Some((dir, depth)) = stack.pop() {
        let Some(real) = resolve_within_root(&dir, &root) else {
            continue;
        };
        if !visited.insert(real) {
            continue;
        }

        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "skipping unreadable directory");
                continue;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                if depth < max_depth {
                    stack.push((path, depth + 1));
                }
            } else if path.is_file() && is_session_candidate(&path, suffix) {
                if let Some(file) = resolve_within_root(&path, &root) {
                    found.push(file);
                }
            }
        }
    }

    found.sort();
    found.dedup();
    found
}

// ---------------------------------------------------------------------------
// Debouncer
// ---------------------------------------------------------------------------

/// Per-key delayed jobs where scheduling replaces the pending job.
///
/// Each job runs on the blocking pool after the delay. Aborting a task that
/// is still sleeping cancels the job; once the job is on the blocking pool
/// it always completes.
pub(crate) struct Debouncer {
    delay: Duration,
    pending: HashMap<PathBuf, JoinHandle<()>>,
}

impl Debouncer {
    pub(crate) fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: HashMap::new(),
        }
    }

    pub(crate) fn schedule<F>(&mut self, key: PathBuf, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.pending.retain(|_, handle| !handle.is_finished());
        if let Some(previous) = self.pending.remove(&key) {
            previous.abort();
        }

        let delay = self.delay;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = tokio::task::spawn_blocking(job).await {
                if e.is_panic() {
                    tracing::error!(error = %e, "session processing panicked");
                }
            }
        });
        self.pending.insert(key, handle);
    }

    /// Jobs scheduled and not yet finished.
    pub(crate) fn pending(&self) -> usize {
        self.pending.values().filter(|h| !h.is_finished()).count()
    }

    pub(crate) fn cancel_all(&mut self) {
        for (_, handle) in self.pending.drain() {
            handle.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// ChangeWatcher
// ---------------------------------------------------------------------------

struct Running {
    /// Dropping this releases the OS watch and closes the event channel.
    watcher: RecommendedWatcher,
    shutdown: oneshot::Sender<()>,
    dispatcher: JoinHandle<()>,
}

pub struct ChangeWatcher {
    root: PathBuf,
    pipeline: Arc<Pipeline>,
    settings: WatchSettings,
    state: WatcherState,
    running: Option<Running>,
}

impl ChangeWatcher {
    pub fn new(root: impl Into<PathBuf>, pipeline: Arc<Pipeline>, settings: WatchSettings) -> Self {
        Self {
            root: root.into(),
            pipeline,
            settings,
            state: WatcherState::Unstarted,
            running: None,
        }
    }

    pub fn state(&self) -> WatcherState {
        self.state
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    /// Run the initial scan, then begin dispatching live events.
    ///
    /// Must be called from within a tokio runtime. The scan runs on the
    /// calling thread. The OS watch is registered before the scan so that
    /// writes during the scan are not missed; they are deduplicated by the
    /// session store.
    pub fn start(&mut self) -> Result<ScanSummary, WatcherError> {
        match self.state {
            WatcherState::Unstarted => {}
            WatcherState::Watching => return Err(WatcherError::AlreadyStarted),
            WatcherState::Stopped => return Err(WatcherError::Stopped),
        }

        if !self.root.is_dir() {
            return Err(WatcherError::RootNotFound(self.root.clone()));
        }
        let root = self
            .root
            .canonicalize()
            .map_err(|_| WatcherError::RootNotFound(self.root.clone()))?;

        let (tx, rx) = mpsc::unbounded_channel::<PathBuf>();
        let suffix = self.settings.file_suffix.clone();
        let mut watcher = notify::RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    for path in event_paths(&event, &suffix) {
                        let _ = tx.send(path);
                    }
                }
                Err(e) => tracing::warn!(error = %e, "filesystem watcher error"),
            },
            notify::Config::default(),
        )?;
        watcher.watch(&root, RecursiveMode::Recursive)?;

        let summary = self.initial_scan(&root);
        tracing::info!(
            root = %root.display(),
            files = summary.files,
            sessions = summary.sessions,
            turns = summary.turns,
            "initial scan complete, watching for changes"
        );

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let dispatcher = tokio::spawn(dispatch(
            rx,
            shutdown_rx,
            root,
            Arc::clone(&self.pipeline),
            self.settings.debounce,
        ));

        self.running = Some(Running {
            watcher,
            shutdown: shutdown_tx,
            dispatcher,
        });
        self.state = WatcherState::Watching;
        Ok(summary)
    }

    /// Run only the initial scan, without registering a watch.
    ///
    /// Used for one-shot exports. The watcher stays `Unstarted`.
    pub fn scan_only(&self) -> Result<ScanSummary, WatcherError> {
        if self.state == WatcherState::Stopped {
            return Err(WatcherError::Stopped);
        }
        let root = self
            .root
            .canonicalize()
            .ok()
            .filter(|r| r.is_dir())
            .ok_or_else(|| WatcherError::RootNotFound(self.root.clone()))?;
        Ok(self.initial_scan(&root))
    }

    /// Stop watching. Idempotent; the watcher cannot be started again.
    pub async fn stop(&mut self) {
        if let Some(running) = self.running.take() {
            drop(running.watcher);
            let _ = running.shutdown.send(());
            let _ = running.dispatcher.await;
            tracing::info!(root = %self.root.display(), "stopped watching");
        }
        self.state = WatcherState::Stopped;
    }

    fn initial_scan(&self, root: &Path) -> ScanSummary {
        let files = scan_tree(root, &self.settings.file_suffix, self.settings.max_depth);
        let mut summary = ScanSummary {
            files: files.len(),
            ..Default::default()
        };

        for path in &files {
            let outcome = if self.settings.backfill {
                self.pipeline.process_file(path)
            } else {
                self.pipeline.baseline_file(path)
            };
            match outcome {
                ProcessOutcome::Emitted { written, .. } => {
                    summary.sessions += 1;
                    summary.turns += written;
                }
                ProcessOutcome::Baselined { turns } => {
                    summary.sessions += 1;
                    summary.turns += turns;
                }
                ProcessOutcome::NoNewTurns => summary.sessions += 1,
                ProcessOutcome::NotASession | ProcessOutcome::Unreadable => {}
            }
        }
        summary
    }
}

/// Event loop: debounce incoming paths and hand them to the pipeline.
async fn dispatch(
    mut rx: mpsc::UnboundedReceiver<PathBuf>,
    mut shutdown: oneshot::Receiver<()>,
    root: PathBuf,
    pipeline: Arc<Pipeline>,
    debounce: Duration,
) {
    let root = Arc::new(root);
    let mut debouncer = Debouncer::new(debounce);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            next = rx.recv() => {
                let Some(path) = next else { break };
                let pipeline = Arc::clone(&pipeline);
                let root = Arc::clone(&root);
                debouncer.schedule(path.clone(), move || {
                    if let Some(path) = resolve_within_root(&path, &root) {
                        pipeline.process_file(&path);
                    }
                });
                tracing::trace!(pending = debouncer.pending(), "scheduled re-read");
            }
        }
    }

    debouncer.cancel_all();
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use rstest::rstest;
    use tempfile::TempDir;

    use crate::appender::LogAppender;
    use crate::format::{TimeZoneMode, TurnFormatter};
    use crate::state::KeyPolicy;

    const SESSION: &str = r#"{"requests": [{"message": {"text": "Hi"}, "response": [{"value": "Hello!"}], "timestamp": 1700000000000}]}"#;

    fn write_file(dir: &Path, relative: &str, content: &str) -> PathBuf {
        let path = dir.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, content).unwrap();
        path
    }

    fn pipeline(log_dir: &Path) -> Arc<Pipeline> {
        Arc::new(Pipeline::new(
            TurnFormatter::new("%H:%M:%S", TimeZoneMode::Utc),
            LogAppender::new(log_dir),
            KeyPolicy::FilePath,
            "chat",
        ))
    }

    fn md_files(dir: &Path) -> Vec<PathBuf> {
        std::fs::read_dir(dir)
            .map(|rd| {
                rd.flatten()
                    .map(|e| e.path())
                    .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("md"))
                    .collect()
            })
            .unwrap_or_default()
    }

    // -- Candidate detection --------------------------------------------------

    #[rstest]
    #[case("/ws/abc/chatSessions/1234.json", true)]
    #[case("session.json", true)]
    #[case("/ws/abc/state.vscdb", false)]
    #[case("/ws/abc/notes.jsonl", false)]
    #[case("/ws/abc/.json", false)]
    #[case("/ws/abc/json", false)]
    fn test_is_session_candidate(#[case] path: &str, #[case] expected: bool) {
        assert_eq!(is_session_candidate(Path::new(path), ".json"), expected);
    }

    #[test]
    fn test_event_paths_filters_kind_and_suffix() {
        let modify = Event {
            kind: EventKind::Modify(notify::event::ModifyKind::Data(
                notify::event::DataChange::Content,
            )),
            paths: vec![PathBuf::from("/ws/a.json"), PathBuf::from("/ws/b.txt")],
            attrs: Default::default(),
        };
        assert_eq!(event_paths(&modify, ".json"), vec![PathBuf::from("/ws/a.json")]);

        let create = Event {
            kind: EventKind::Create(notify::event::CreateKind::File),
            paths: vec![PathBuf::from("/ws/new.json")],
            attrs: Default::default(),
        };
        assert_eq!(event_paths(&create, ".json").len(), 1);

        let remove = Event {
            kind: EventKind::Remove(notify::event::RemoveKind::File),
            paths: vec![PathBuf::from("/ws/a.json")],
            attrs: Default::default(),
        };
        assert!(event_paths(&remove, ".json").is_empty());
    }

    // -- Scan -----------------------------------------------------------------

    #[test]
    fn test_scan_tree_finds_nested_candidates() {
        let tmp = TempDir::new().unwrap();
        let a = write_file(tmp.path(), "ws1/chatSessions/a.json", SESSION);
        let b = write_file(tmp.path(), "ws2/chatSessions/b.json", SESSION);
        write_file(tmp.path(), "ws1/state.vscdb", "binary");
        write_file(tmp.path(), "ws2/notes.txt", "text");

        let found = scan_tree(tmp.path(), ".json", DEFAULT_MAX_DEPTH);
        assert_eq!(
            found,
            vec![a.canonicalize().unwrap(), b.canonicalize().unwrap()]
        );
    }

    #[test]
    fn test_scan_tree_respects_max_depth() {
        let tmp = TempDir::new().unwrap();
        write_file(tmp.path(), "top.json", SESSION);
        write_file(tmp.path(), "one/two/deep.json", SESSION);

        assert_eq!(scan_tree(tmp.path(), ".json", 0).len(), 1);
        assert_eq!(scan_tree(tmp.path(), ".json", 1).len(), 1);
        assert_eq!(scan_tree(tmp.path(), ".json", 2).len(), 2);
    }

    #[test]
    fn test_scan_tree_missing_root_is_empty() {
        assert!(scan_tree(Path::new("/nonexistent/chatlog/root"), ".json", 4).is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_scan_tree_survives_symlink_cycle() {
        let tmp = TempDir::new().unwrap();
        write_file(tmp.path(), "ws/chatSessions/a.json", SESSION);
        std::os::unix::fs::symlink(tmp.path().join("ws"), tmp.path().join("ws/chatSessions/loop"))
            .unwrap();

        let found = scan_tree(tmp.path(), ".json", DEFAULT_MAX_DEPTH);
        assert_eq!(found.len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_scan_tree_ignores_symlink_outside_root() {
        let outside = TempDir::new().unwrap();
        write_file(outside.path(), "secret.json", SESSION);
        let tmp = TempDir::new().unwrap();
        std::os::unix::fs::symlink(outside.path(), tmp.path().join("escape")).unwrap();

        assert!(scan_tree(tmp.path(), ".json", DEFAULT_MAX_DEPTH).is_empty());
    }

    // -- Debouncer ------------------------------------------------------------

    #[tokio::test]
    async fn test_debouncer_coalesces_same_key() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut debouncer = Debouncer::new(Duration::from_millis(50));

        for _ in 0..5 {
            let counter = Arc::clone(&counter);
            debouncer.schedule(PathBuf::from("/ws/a.json"), move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(debouncer.pending(), 1);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(debouncer.pending(), 0);
    }

    #[tokio::test]
    async fn test_debouncer_keys_are_independent() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut debouncer = Debouncer::new(Duration::from_millis(20));

        for name in ["/ws/a.json", "/ws/b.json"] {
            let counter = Arc::clone(&counter);
            debouncer.schedule(PathBuf::from(name), move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_debouncer_cancel_all_clears_timers() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut debouncer = Debouncer::new(Duration::from_millis(100));
        let c = Arc::clone(&counter);
        debouncer.schedule(PathBuf::from("/ws/a.json"), move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        debouncer.cancel_all();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    // -- Lifecycle ------------------------------------------------------------

    #[tokio::test]
    async fn test_start_with_missing_root_fails() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("missing");
        let mut watcher = ChangeWatcher::new(&root, pipeline(tmp.path()), WatchSettings::default());

        match watcher.start() {
            Err(WatcherError::RootNotFound(p)) => assert_eq!(p, root),
            other => panic!("expected RootNotFound, got: {:?}", other),
        }
        assert_eq!(watcher.state(), WatcherState::Unstarted);
    }

    #[tokio::test]
    async fn test_initial_scan_backfills_then_stops() {
        let root = TempDir::new().unwrap();
        let logs = TempDir::new().unwrap();
        write_file(root.path(), "ws/chatSessions/a.json", SESSION);
        write_file(root.path(), "ws/settings.json", r#"{"theme": "dark"}"#);

        let mut watcher = ChangeWatcher::new(root.path(), pipeline(logs.path()), WatchSettings::default());
        let summary = watcher.start().unwrap();
        assert_eq!(
            summary,
            ScanSummary {
                files: 2,
                sessions: 1,
                turns: 1
            }
        );
        assert_eq!(watcher.state(), WatcherState::Watching);
        assert!(matches!(watcher.start(), Err(WatcherError::AlreadyStarted)));
        assert_eq!(md_files(logs.path()).len(), 1);

        watcher.stop().await;
        assert_eq!(watcher.state(), WatcherState::Stopped);
        assert!(matches!(watcher.start(), Err(WatcherError::Stopped)));

        // Stopping twice is harmless.
        watcher.stop().await;
    }

    #[tokio::test]
    async fn test_initial_scan_without_backfill_writes_nothing() {
        let root = TempDir::new().unwrap();
        let logs = TempDir::new().unwrap();
        write_file(root.path(), "ws/chatSessions/a.json", SESSION);

        let settings = WatchSettings {
            backfill: false,
            ..Default::default()
        };
        let mut watcher = ChangeWatcher::new(root.path(), pipeline(logs.path()), settings);
        let summary = watcher.start().unwrap();
        assert_eq!(summary.sessions, 1);
        assert_eq!(summary.turns, 1);
        assert!(md_files(logs.path()).is_empty());
        assert_eq!(watcher.pipeline().tracked_sessions(), 1);

        watcher.stop().await;
    }

    #[test]
    fn test_scan_only_does_not_start() {
        let root = TempDir::new().unwrap();
        let logs = TempDir::new().unwrap();
        write_file(root.path(), "ws/chatSessions/a.json", SESSION);

        let watcher = ChangeWatcher::new(root.path(), pipeline(logs.path()), WatchSettings::default());
        let summary = watcher.scan_only().unwrap();
        assert_eq!(summary.turns, 1);
        assert_eq!(watcher.state(), WatcherState::Unstarted);
        assert_eq!(md_files(logs.path()).len(), 1);

        // A second pass finds nothing new.
        assert_eq!(watcher.scan_only().unwrap().turns, 0);
    }

    #[tokio::test]
    async fn test_live_change_is_logged() {
        let root = TempDir::new().unwrap();
        let logs = TempDir::new().unwrap();
        std::fs::create_dir_all(root.path().join("ws/chatSessions")).unwrap();

        let settings = WatchSettings {
            debounce: Duration::from_millis(20),
            ..Default::default()
        };
        let mut watcher = ChangeWatcher::new(root.path(), pipeline(logs.path()), settings);
        watcher.start().unwrap();

        write_file(root.path(), "ws/chatSessions/live.json", SESSION);

        let mut logged = false;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if !md_files(logs.path()).is_empty() {
                logged = true;
                break;
            }
        }
        watcher.stop().await;
        assert!(logged, "expected a log file after a live change");
    }

    #[tokio::test]
    async fn test_burst_of_writes_is_read_once() {
        let root = TempDir::new().unwrap();
        let logs = TempDir::new().unwrap();
        std::fs::create_dir_all(root.path().join("ws/chatSessions")).unwrap();

        let settings = WatchSettings {
            debounce: Duration::from_millis(500),
            ..Default::default()
        };
        let mut watcher = ChangeWatcher::new(root.path(), pipeline(logs.path()), settings);
        watcher.start().unwrap();
        assert_eq!(watcher.pipeline().reads(), 0);

        for _ in 0..5 {
            write_file(root.path(), "ws/chatSessions/live.json", SESSION);
        }

        let mut logged = false;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if !md_files(logs.path()).is_empty() {
                logged = true;
                break;
            }
        }
        // Leave room for a second, uncoalesced read to show up.
        tokio::time::sleep(Duration::from_millis(1000)).await;
        watcher.stop().await;

        assert!(logged, "expected a log file after a burst of writes");
        assert_eq!(watcher.pipeline().reads(), 1);
        let content = std::fs::read_to_string(&md_files(logs.path())[0]).unwrap();
        assert_eq!(content.matches("# Copilot Chat Log").count(), 1);
        assert_eq!(content.matches("## 👤 User").count(), 1);
    }

    #[tokio::test]
    async fn test_stop_cancels_pending_reads() {
        let root = TempDir::new().unwrap();
        let logs = TempDir::new().unwrap();
        std::fs::create_dir_all(root.path().join("ws/chatSessions")).unwrap();

        let settings = WatchSettings {
            debounce: Duration::from_millis(1500),
            ..Default::default()
        };
        let mut watcher = ChangeWatcher::new(root.path(), pipeline(logs.path()), settings);
        watcher.start().unwrap();

        write_file(root.path(), "ws/chatSessions/late.json", SESSION);
        // Long enough for the event to arrive, well short of the delay.
        tokio::time::sleep(Duration::from_millis(300)).await;
        watcher.stop().await;

        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert_eq!(watcher.pipeline().reads(), 0);
        assert!(md_files(logs.path()).is_empty());
    }

    #[test]
    fn test_watcher_error_display() {
        let err = WatcherError::RootNotFound(PathBuf::from("/some/root"));
        assert_eq!(err.to_string(), "watch root not found: /some/root");
        assert_eq!(
            WatcherError::Stopped.to_string(),
            "watcher has been stopped and cannot be restarted"
        );
    }
}
