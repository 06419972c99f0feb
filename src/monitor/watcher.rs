use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::database::Database;
use crate::excel::{StabilityCheck, StabilityProbe, WorkbookInspector};
use crate::monitor::ingest::ingest;
use crate::monitor::{MonitorConfig, MonitorError, MonitorState};
use crate::sync::SyncNotifier;

/// Watches a directory tree for spreadsheet files and feeds stable ones into
/// the revision store.
///
/// `start()` sweeps stale records, copies seed files, backfills the existing
/// tree, then subscribes to create/modify notifications dispatched on a
/// background thread. One bad file never stops the watcher: every per-event
/// failure is logged and dropped.
pub struct DirectoryMonitor {
    shared: Arc<MonitorShared>,
    watcher: Mutex<Option<RecommendedWatcher>>,
    thread: Mutex<Option<JoinHandle<()>>>,
    state: Mutex<MonitorState>,
}

/// Everything the event-dispatch thread needs.
struct MonitorShared {
    db: Arc<Database>,
    config: MonitorConfig,
    probe: Box<dyn StabilityCheck>,
    inspector: Option<Arc<dyn WorkbookInspector>>,
    notifier: Option<Arc<dyn SyncNotifier>>,
    /// Paths ingested via a create event in the current run. A modify on such
    /// a path is treated as already handled and clears the entry, so the next
    /// modify is processed normally.
    recently_created: Mutex<HashSet<PathBuf>>,
    stopping: AtomicBool,
}

impl DirectoryMonitor {
    pub fn new(db: Arc<Database>, config: MonitorConfig) -> Self {
        Self::with_collaborators(db, config, Box::new(StabilityProbe::default()), None, None)
    }

    /// Build a monitor with explicit collaborators: a stability check, the
    /// optional workbook inspector and the optional sync notifier.
    pub fn with_collaborators(
        db: Arc<Database>,
        config: MonitorConfig,
        probe: Box<dyn StabilityCheck>,
        inspector: Option<Arc<dyn WorkbookInspector>>,
        notifier: Option<Arc<dyn SyncNotifier>>,
    ) -> Self {
        DirectoryMonitor {
            shared: Arc::new(MonitorShared {
                db,
                config,
                probe,
                inspector,
                notifier,
                recently_created: Mutex::new(HashSet::new()),
                stopping: AtomicBool::new(false),
            }),
            watcher: Mutex::new(None),
            thread: Mutex::new(None),
            state: Mutex::new(MonitorState::Idle),
        }
    }

    pub fn state(&self) -> MonitorState {
        self.state
            .lock()
            .map(|s| *s)
            .unwrap_or(MonitorState::Stopped)
    }

    /// Sweep stale records, seed and backfill the watch root, then subscribe
    /// to filesystem notifications.
    ///
    /// Only setup failures (missing root, subscription failure) are returned;
    /// every per-file failure during seed or backfill is logged and skipped.
    pub fn start(&self) -> Result<(), MonitorError> {
        // Held across the whole setup: a concurrent start() blocks here and
        // then sees Running, so two callers can never both subscribe.
        let mut state = self.state.lock().map_err(|_| MonitorError::Lock)?;
        if *state == MonitorState::Running {
            return Err(MonitorError::AlreadyRunning);
        }

        let root = &self.shared.config.root;
        if !root.is_dir() {
            return Err(MonitorError::RootNotFound(root.clone()));
        }

        let swept = self.shared.db.sweep_missing_files()?;
        if swept > 0 {
            info!(swept, "removed records with missing backing paths");
        }

        if let Some(seed_dir) = self.shared.config.seed_dir.clone() {
            copy_seed_files(&self.shared, &seed_dir);
        }

        backfill(&self.shared);

        let (tx, rx) = channel();
        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = tx.send(res);
            },
            Config::default(),
        )?;
        watcher.watch(root, RecursiveMode::Recursive)?;

        self.shared.stopping.store(false, Ordering::SeqCst);
        let shared = self.shared.clone();
        let handle = thread::spawn(move || dispatch_events(rx, shared));

        *self.watcher.lock().map_err(|_| MonitorError::Lock)? = Some(watcher);
        *self.thread.lock().map_err(|_| MonitorError::Lock)? = Some(handle);
        *state = MonitorState::Running;

        info!(root = %root.display(), "directory monitoring started");
        Ok(())
    }

    /// Unsubscribe and join the dispatch thread. Safe to call repeatedly; a
    /// no-op unless the monitor is running. In-flight handlers finish before
    /// this returns.
    pub fn stop(&self) {
        {
            let Ok(mut state) = self.state.lock() else {
                return;
            };
            if *state != MonitorState::Running {
                return;
            }
            *state = MonitorState::Stopping;
        }

        self.shared.stopping.store(true, Ordering::SeqCst);

        // Dropping the watcher ends the subscription and disconnects the
        // channel, which lets the dispatch loop exit.
        if let Ok(mut watcher) = self.watcher.lock() {
            *watcher = None;
        }
        if let Ok(mut handle) = self.thread.lock() {
            if let Some(handle) = handle.take() {
                let _ = handle.join();
            }
        }
        if let Ok(mut set) = self.shared.recently_created.lock() {
            set.clear();
        }

        if let Ok(mut state) = self.state.lock() {
            *state = MonitorState::Stopped;
        }
        info!(root = %self.shared.config.root.display(), "directory monitoring stopped");
    }
}

impl Drop for DirectoryMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn dispatch_events(rx: Receiver<Result<Event, notify::Error>>, shared: Arc<MonitorShared>) {
    loop {
        match rx.recv_timeout(Duration::from_secs(1)) {
            Ok(Ok(event)) => handle_event(&shared, &event),
            Ok(Err(e)) => warn!(error = %e, "filesystem watch error"),
            Err(RecvTimeoutError::Timeout) => {
                if shared.stopping.load(Ordering::SeqCst) {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

fn handle_event(shared: &MonitorShared, event: &Event) {
    match event.kind {
        EventKind::Create(_) => {
            for path in &event.paths {
                handle_create(shared, path);
            }
        }
        EventKind::Modify(_) => {
            for path in &event.paths {
                handle_modify(shared, path);
            }
        }
        _ => {}
    }
}

/// Create events gate on the stability probe. A file that never stabilizes is
/// dropped without retry; the eventual modify event, if any, is the second
/// chance.
fn handle_create(shared: &MonitorShared, path: &Path) {
    if path.is_dir() || !shared.config.matches_extension(path) {
        return;
    }

    // Repeat create notifications for a path already handled this run.
    if let Ok(set) = shared.recently_created.lock() {
        if set.contains(path) {
            return;
        }
    }

    info!(path = %path.display(), "new spreadsheet detected");

    if !shared.probe.is_stable(path) {
        warn!(path = %path.display(), "file never stabilized, dropping create event");
        return;
    }

    match ingest(
        &shared.db,
        path,
        shared.inspector.as_deref(),
        &shared.config.retention,
    ) {
        Ok(receipt) => {
            if let Ok(mut set) = shared.recently_created.lock() {
                set.insert(path.to_path_buf());
            }
            if let Some(notifier) = &shared.notifier {
                notifier.revision_committed(&receipt);
            }
        }
        Err(e) => warn!(path = %path.display(), error = %e, "ingestion failed for create event"),
    }
}

/// Modify events settle briefly, then ingest unless the create handler
/// already covered this path or the inspector rejects the workbook.
fn handle_modify(shared: &MonitorShared, path: &Path) {
    thread::sleep(shared.config.settle_delay);

    if path.is_dir() || !shared.config.matches_extension(path) || !path.exists() {
        return;
    }

    if let Ok(mut set) = shared.recently_created.lock() {
        // One-shot suppression: the create event already ingested this write.
        if set.remove(path) {
            return;
        }
    }

    if let Some(inspector) = &shared.inspector {
        if !inspector.is_tracked(path) {
            debug!(path = %path.display(), "not a tracked workbook, ignoring modify");
            return;
        }
    }

    match ingest(
        &shared.db,
        path,
        shared.inspector.as_deref(),
        &shared.config.retention,
    ) {
        Ok(receipt) => {
            info!(
                path = %path.display(),
                revision = receipt.revision_number,
                "spreadsheet updated"
            );
            if let Some(notifier) = &shared.notifier {
                notifier.revision_committed(&receipt);
            }
        }
        Err(e) => warn!(path = %path.display(), error = %e, "ingestion failed for modify event"),
    }
}

/// Copy matching files from the seed directory into the watch root, feeding
/// each copy through the create path as a synthetic event.
fn copy_seed_files(shared: &MonitorShared, seed_dir: &Path) {
    let entries = match std::fs::read_dir(seed_dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(seed_dir = %seed_dir.display(), error = %e, "cannot read seed directory");
            return;
        }
    };

    for entry in entries.flatten() {
        let src = entry.path();
        if !src.is_file() || !shared.config.matches_extension(&src) {
            continue;
        }
        let Some(name) = src.file_name() else {
            continue;
        };
        let dst = shared.config.root.join(name);
        if dst.exists() {
            continue;
        }

        match std::fs::copy(&src, &dst) {
            Ok(_) => {
                info!(file = %dst.display(), "seed file copied into watch root");
                handle_create(shared, &dst);
            }
            Err(e) => warn!(file = %src.display(), error = %e, "seed file copy failed"),
        }
    }
}

/// Recursive startup scan feeding every matching file through the same path
/// as a live create event. Failures stay per-file.
fn backfill(shared: &MonitorShared) {
    for entry in walkdir::WalkDir::new(&shared.config.root)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if entry.file_type().is_file() && shared.config.matches_extension(path) {
            handle_create(shared, path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::IngestReceipt;
    use tempfile::TempDir;

    /// Probe that accepts anything on the first attempt.
    struct AlwaysStable;

    impl StabilityCheck for AlwaysStable {
        fn is_stable(&self, _path: &Path) -> bool {
            true
        }
    }

    struct RejectAll;

    impl WorkbookInspector for RejectAll {
        fn is_tracked(&self, _path: &Path) -> bool {
            false
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        revisions: Mutex<Vec<i64>>,
    }

    impl SyncNotifier for RecordingNotifier {
        fn revision_committed(&self, receipt: &IngestReceipt) {
            self.revisions.lock().unwrap().push(receipt.revision_id);
        }

        fn comparison_recorded(&self, _comparison_id: i64) {}
    }

    /// Route handler logs through the test writer; safe to call per test.
    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    fn write_workbook(path: &Path) {
        let book = umya_spreadsheet::new_file();
        umya_spreadsheet::writer::xlsx::write(&book, path).unwrap();
    }

    fn test_monitor(root: &Path, db: Arc<Database>) -> DirectoryMonitor {
        let mut config = MonitorConfig::new(root);
        config.settle_delay = Duration::ZERO;
        DirectoryMonitor::with_collaborators(db, config, Box::new(AlwaysStable), None, None)
    }

    #[test]
    fn test_start_fails_on_missing_root() {
        let dir = TempDir::new().unwrap();
        let db = Arc::new(Database::open(dir.path().join("store.db")).unwrap());
        let monitor = test_monitor(&dir.path().join("no_such_dir"), db);

        assert!(matches!(
            monitor.start(),
            Err(MonitorError::RootNotFound(_))
        ));
        assert_eq!(monitor.state(), MonitorState::Idle);
    }

    #[test]
    fn test_backfill_ingests_existing_tree() {
        init_tracing();
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("watch");
        let nested = root.join("line7");
        std::fs::create_dir_all(&nested).unwrap();

        write_workbook(&root.join("BOM_rev2.xlsx"));
        write_workbook(&nested.join("Panel.xlsx"));
        std::fs::write(root.join("notes.txt"), b"ignored").unwrap();

        let db = Arc::new(Database::open(dir.path().join("store.db")).unwrap());
        let monitor = test_monitor(&root, db.clone());

        monitor.start().unwrap();
        assert_eq!(monitor.state(), MonitorState::Running);
        assert_eq!(db.count_files().unwrap(), 2);

        monitor.stop();
        assert_eq!(monitor.state(), MonitorState::Stopped);
    }

    #[test]
    fn test_seed_files_copied_through_create_path() {
        init_tracing();
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("watch");
        let seed = dir.path().join("attached");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::create_dir_all(&seed).unwrap();
        write_workbook(&seed.join("Cabinet.xlsx"));

        let db = Arc::new(Database::open(dir.path().join("store.db")).unwrap());
        let mut config = MonitorConfig::new(&root);
        config.seed_dir = Some(seed);
        config.settle_delay = Duration::ZERO;
        let monitor = DirectoryMonitor::with_collaborators(
            db.clone(),
            config,
            Box::new(AlwaysStable),
            None,
            None,
        );

        monitor.start().unwrap();
        monitor.stop();

        assert!(root.join("Cabinet.xlsx").exists());
        let file = db.find_file("Cabinet.xlsx").unwrap().unwrap();
        // Backfill sees the copy too, but the create-set dedupes the repeat.
        assert_eq!(file.current_revision, 1);
    }

    #[test]
    fn test_concurrent_start_subscribes_once() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("watch");
        std::fs::create_dir_all(&root).unwrap();
        let db = Arc::new(Database::open(dir.path().join("store.db")).unwrap());
        let monitor = Arc::new(test_monitor(&root, db));

        let mut handles = Vec::new();
        for _ in 0..2 {
            let monitor = monitor.clone();
            handles.push(thread::spawn(move || monitor.start().is_ok()));
        }

        let started: Vec<bool> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        // Whoever loses the race sees Running and backs off.
        assert_eq!(started.iter().filter(|ok| **ok).count(), 1);
        assert_eq!(monitor.state(), MonitorState::Running);
        monitor.stop();
    }

    #[test]
    fn test_stop_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("watch");
        std::fs::create_dir_all(&root).unwrap();
        let db = Arc::new(Database::open(dir.path().join("store.db")).unwrap());
        let monitor = test_monitor(&root, db);

        monitor.stop(); // not running, no-op
        assert_eq!(monitor.state(), MonitorState::Idle);

        monitor.start().unwrap();
        monitor.stop();
        monitor.stop();
        assert_eq!(monitor.state(), MonitorState::Stopped);
    }

    #[test]
    fn test_modify_after_create_is_suppressed_once() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("watch");
        std::fs::create_dir_all(&root).unwrap();
        let path = root.join("BOM.xlsx");
        write_workbook(&path);

        let db = Arc::new(Database::open(dir.path().join("store.db")).unwrap());
        let monitor = test_monitor(&root, db.clone());
        let shared = &monitor.shared;

        handle_create(shared, &path);
        let file = db.find_file("BOM.xlsx").unwrap().unwrap();
        assert_eq!(file.current_revision, 1);

        // First modify is the tail of the create; suppressed one-shot.
        handle_modify(shared, &path);
        let file = db.find_file("BOM.xlsx").unwrap().unwrap();
        assert_eq!(file.current_revision, 1);

        // The next modify is a real change.
        handle_modify(shared, &path);
        let file = db.find_file("BOM.xlsx").unwrap().unwrap();
        assert_eq!(file.current_revision, 2);
    }

    #[test]
    fn test_repeat_create_notifications_dedupe() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("watch");
        std::fs::create_dir_all(&root).unwrap();
        let path = root.join("BOM.xlsx");
        write_workbook(&path);

        let db = Arc::new(Database::open(dir.path().join("store.db")).unwrap());
        let monitor = test_monitor(&root, db.clone());

        handle_create(&monitor.shared, &path);
        handle_create(&monitor.shared, &path);

        let file = db.find_file("BOM.xlsx").unwrap().unwrap();
        assert_eq!(file.current_revision, 1);
    }

    #[test]
    fn test_modify_consults_inspector() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("watch");
        std::fs::create_dir_all(&root).unwrap();
        let path = root.join("NotOurs.xlsx");
        write_workbook(&path);

        let db = Arc::new(Database::open(dir.path().join("store.db")).unwrap());
        let mut config = MonitorConfig::new(&root);
        config.settle_delay = Duration::ZERO;
        let monitor = DirectoryMonitor::with_collaborators(
            db.clone(),
            config,
            Box::new(AlwaysStable),
            Some(Arc::new(RejectAll)),
            None,
        );

        handle_modify(&monitor.shared, &path);
        assert_eq!(db.count_files().unwrap(), 0);
    }

    #[test]
    fn test_notifier_runs_after_commit() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("watch");
        std::fs::create_dir_all(&root).unwrap();
        let path = root.join("BOM.xlsx");
        write_workbook(&path);

        let db = Arc::new(Database::open(dir.path().join("store.db")).unwrap());
        let notifier = Arc::new(RecordingNotifier::default());
        let mut config = MonitorConfig::new(&root);
        config.settle_delay = Duration::ZERO;
        let monitor = DirectoryMonitor::with_collaborators(
            db.clone(),
            config,
            Box::new(AlwaysStable),
            None,
            Some(notifier.clone()),
        );

        handle_create(&monitor.shared, &path);

        let seen = notifier.revisions.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(db.get_revision(seen[0]).unwrap().is_some());
    }

    // Live notify-delivered events are not exercised here: delivery timing is
    // platform dependent. Backfill drives the same handler path.
}
