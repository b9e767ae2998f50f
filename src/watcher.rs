//! Change-reaction engine.
//!
//! A notify subscription forwards raw events over a channel to one worker
//! thread. The worker translates them into [`FileEvent`]s and applies each
//! one to the [`IndexStore`] through a [`ChangeProcessor`], which owns the
//! extension filters, the per-path debounce state and the readiness wait.

use std::fs::File;
use std::io::Read;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use lru::LruCache;
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, error, info, warn};

use crate::core::{FileEvent, FileEventKind};
use crate::error::{IndexError, Result};
use crate::filter::ExtensionFilter;
use crate::store::IndexStore;

pub const MIN_INTERVAL: Duration = Duration::from_millis(100);
pub const READY_TIMEOUT: Duration = Duration::from_secs(2);
pub const READY_RETRY: Duration = Duration::from_millis(100);
const DEBOUNCE_CAPACITY: usize = 4096;

/// Interval in seconds → duration, never below [`MIN_INTERVAL`].
pub fn clamp_interval(secs: f64) -> Duration {
    if secs.is_finite() && secs > MIN_INTERVAL.as_secs_f64() {
        Duration::from_secs_f64(secs)
    } else {
        MIN_INTERVAL
    }
}

/// A monitored root with its extension filter and debounce interval
#[derive(Debug, Clone, PartialEq)]
pub struct WatchTarget {
    pub root: PathBuf,
    pub filter: ExtensionFilter,
    pub interval: Duration,
    pub recursive: bool,
}

impl WatchTarget {
    pub fn new<P: Into<PathBuf>>(root: P, filter: ExtensionFilter, interval_secs: f64) -> Self {
        Self {
            root: root.into(),
            filter,
            interval: clamp_interval(interval_secs),
            recursive: true,
        }
    }

    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    fn covers(&self, path: &Path) -> bool {
        path.starts_with(&self.root)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Stopped,
    Starting,
    Running,
}

/// What the engine did with one event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reaction {
    /// Outside every target, filtered out, or a store file
    Ignored,
    /// Modified again inside the debounce window
    Debounced,
    /// Never became readable before the timeout
    NotReady,
    Indexed,
    Refreshed,
    Removed,
    /// A directory vanished and took this many records with it
    RemovedTree(usize),
    Moved { removed: bool, indexed: bool },
    Failed(String),
}

/// Per-path cooldown for Modified events, bounded in size.
pub struct Debouncer {
    last_accepted: LruCache<PathBuf, Instant>,
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new(DEBOUNCE_CAPACITY)
    }
}

impl Debouncer {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            last_accepted: LruCache::new(capacity),
        }
    }

    /// Accept `path` unless it was accepted less than `window` before `now`.
    pub fn accept_at(&mut self, path: &Path, window: Duration, now: Instant) -> bool {
        if let Some(last) = self.last_accepted.get(path) {
            if now.saturating_duration_since(*last) < window {
                return false;
            }
        }
        self.last_accepted.put(path.to_path_buf(), now);
        true
    }

    pub fn accept(&mut self, path: &Path, window: Duration) -> bool {
        self.accept_at(path, window, Instant::now())
    }

    pub fn forget(&mut self, path: &Path) {
        self.last_accepted.pop(path);
    }

    pub fn forget_under(&mut self, dir: &Path) {
        let doomed: Vec<PathBuf> = self
            .last_accepted
            .iter()
            .filter(|(path, _)| path.starts_with(dir))
            .map(|(path, _)| path.clone())
            .collect();
        for path in doomed {
            self.last_accepted.pop(&path);
        }
    }

    /// Drop entries whose window has already closed.
    pub fn prune_at(&mut self, window: Duration, now: Instant) {
        let expired: Vec<PathBuf> = self
            .last_accepted
            .iter()
            .filter(|(_, last)| now.saturating_duration_since(**last) >= window)
            .map(|(path, _)| path.clone())
            .collect();
        for path in expired {
            self.last_accepted.pop(&path);
        }
    }

    pub fn len(&self) -> usize {
        self.last_accepted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_accepted.is_empty()
    }
}

/// Poll until `path` opens and a one-byte read succeeds, or `timeout` passes.
///
/// An empty read counts as ready: a zero-length file is a valid final state.
pub fn wait_until_ready(path: &Path, timeout: Duration, retry: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if let Ok(mut file) = File::open(path) {
            let mut byte = [0u8; 1];
            if file.read(&mut byte).is_ok() {
                return true;
            }
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(retry);
    }
}

/// Applies file events to the store. Runs on the engine's worker thread.
pub struct ChangeProcessor {
    store: Arc<IndexStore>,
    targets: Vec<WatchTarget>,
    debouncer: Debouncer,
    ready_timeout: Duration,
    ready_retry: Duration,
}

impl ChangeProcessor {
    pub fn new(store: Arc<IndexStore>, targets: Vec<WatchTarget>) -> Self {
        Self {
            store,
            targets,
            debouncer: Debouncer::default(),
            ready_timeout: READY_TIMEOUT,
            ready_retry: READY_RETRY,
        }
    }

    pub fn with_readiness(mut self, timeout: Duration, retry: Duration) -> Self {
        self.ready_timeout = timeout;
        self.ready_retry = retry;
        self
    }

    pub fn handle(&mut self, event: FileEvent) -> Reaction {
        let reaction = match &event.kind {
            FileEventKind::Created => self.on_created(&event.path),
            FileEventKind::Modified => self.on_modified(&event.path),
            FileEventKind::Deleted => self.on_deleted(&event.path),
            FileEventKind::Moved { from, to } => self.on_moved(from, to),
        };
        debug!(
            "{} {} -> {:?}",
            event.label(),
            event.path.display(),
            reaction
        );
        reaction
    }

    /// Forget debounce entries older than the longest target interval.
    pub fn prune(&mut self) {
        let window = self
            .targets
            .iter()
            .map(|t| t.interval)
            .max()
            .unwrap_or(MIN_INTERVAL);
        self.debouncer.prune_at(window, Instant::now());
    }

    /// The innermost target whose root contains `path`.
    fn owning_target(&self, path: &Path) -> Option<&WatchTarget> {
        if self.store.is_store_file(path) {
            return None;
        }
        self.targets
            .iter()
            .filter(|t| t.covers(path))
            .max_by_key(|t| t.root.components().count())
    }

    /// The target owning `path`, if the path passes its filter.
    fn target_for(&self, path: &Path) -> Option<&WatchTarget> {
        self.owning_target(path)
            .filter(|t| t.filter.should_watch(path))
    }

    fn wait_ready(&self, path: &Path) -> bool {
        let ready = wait_until_ready(path, self.ready_timeout, self.ready_retry);
        if !ready {
            warn!("File not ready for processing: {}", path.display());
        }
        ready
    }

    fn on_created(&mut self, path: &Path) -> Reaction {
        if self.target_for(path).is_none() {
            return Reaction::Ignored;
        }
        if !self.wait_ready(path) {
            return Reaction::NotReady;
        }
        info!("File created: {}", path.display());
        match self.store.add(path) {
            Ok(_) => Reaction::Indexed,
            Err(err) => {
                error!("Failed to add file to index: {}: {}", path.display(), err);
                Reaction::Failed(err.to_string())
            }
        }
    }

    fn on_modified(&mut self, path: &Path) -> Reaction {
        let Some(window) = self.target_for(path).map(|t| t.interval) else {
            return Reaction::Ignored;
        };
        if !self.debouncer.accept(path, window) {
            return Reaction::Debounced;
        }
        if !self.wait_ready(path) {
            return Reaction::NotReady;
        }
        info!("File modified: {}", path.display());
        match self.store.refresh(path) {
            Ok(_) => Reaction::Refreshed,
            Err(err) => {
                error!("Failed to update file in index: {}: {}", path.display(), err);
                Reaction::Failed(err.to_string())
            }
        }
    }

    fn on_deleted(&mut self, path: &Path) -> Reaction {
        if self.owning_target(path).is_none() {
            return Reaction::Ignored;
        }
        self.debouncer.forget(path);

        if self.target_for(path).is_some() {
            match self.store.remove(path) {
                Ok(_) => {
                    info!("File deleted: {}", path.display());
                    return Reaction::Removed;
                }
                Err(err) if err.is_not_found() => {}
                Err(err) => {
                    error!("Failed to remove file from index: {}: {}", path.display(), err);
                    return Reaction::Failed(err.to_string());
                }
            }
        }

        // The path may have been a directory
        match self.store.remove_prefix(path) {
            Ok(0) => Reaction::Ignored,
            Ok(count) => {
                self.debouncer.forget_under(path);
                info!("Directory removed: {} ({} files)", path.display(), count);
                Reaction::RemovedTree(count)
            }
            Err(err) => {
                error!("Failed to remove directory from index: {}: {}", path.display(), err);
                Reaction::Failed(err.to_string())
            }
        }
    }

    fn on_moved(&mut self, from: &Path, to: &Path) -> Reaction {
        let watch_from = self.target_for(from).is_some();
        let watch_to = self.target_for(to).is_some();
        if !watch_from && !watch_to {
            return Reaction::Ignored;
        }
        info!("File moved: {} -> {}", from.display(), to.display());

        let mut removed = false;
        if watch_from {
            self.debouncer.forget(from);
            match self.store.remove(from) {
                Ok(_) => removed = true,
                Err(err) if err.is_not_found() => {}
                Err(err) => error!("Failed to remove moved file: {}: {}", from.display(), err),
            }
        }

        let mut indexed = false;
        if watch_to && self.wait_ready(to) {
            match self.store.add(to) {
                Ok(_) => indexed = true,
                Err(err) => error!("Failed to add moved file to index: {}: {}", to.display(), err),
            }
        }

        Reaction::Moved { removed, indexed }
    }
}

struct Worker {
    watcher: RecommendedWatcher,
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Keeps the index in step with the filesystem under a set of roots.
pub struct FileWatcher {
    store: Arc<IndexStore>,
    targets: Vec<WatchTarget>,
    state: EngineState,
    worker: Option<Worker>,
    ready_timeout: Duration,
    ready_retry: Duration,
}

impl FileWatcher {
    pub fn new(store: Arc<IndexStore>, targets: Vec<WatchTarget>) -> Self {
        Self {
            store,
            targets,
            state: EngineState::Stopped,
            worker: None,
            ready_timeout: READY_TIMEOUT,
            ready_retry: READY_RETRY,
        }
    }

    pub fn with_readiness(mut self, timeout: Duration, retry: Duration) -> Self {
        self.ready_timeout = timeout;
        self.ready_retry = retry;
        self
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == EngineState::Running
    }

    pub fn targets(&self) -> &[WatchTarget] {
        &self.targets
    }

    pub fn store(&self) -> &Arc<IndexStore> {
        &self.store
    }

    /// Interval of the first target, or the floor when nothing is watched
    pub fn interval(&self) -> Duration {
        self.targets
            .first()
            .map(|t| t.interval)
            .unwrap_or(MIN_INTERVAL)
    }

    /// Subscribe to every root and spawn the worker.
    ///
    /// Every root is checked before anything starts; missing roots are
    /// reported together.
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            warn!("File monitor is already running");
            return Err(IndexError::AlreadyRunning);
        }
        if self.targets.is_empty() {
            return Err(IndexError::Config(
                "no paths configured for monitoring".to_string(),
            ));
        }

        self.state = EngineState::Starting;

        let invalid: Vec<PathBuf> = self
            .targets
            .iter()
            .filter(|t| !t.root.exists())
            .map(|t| t.root.clone())
            .collect();
        if !invalid.is_empty() {
            self.state = EngineState::Stopped;
            error!("Cannot start monitor, missing paths: {:?}", invalid);
            return Err(IndexError::InvalidWatchPath(invalid));
        }

        match self.spawn_worker() {
            Ok(worker) => {
                self.worker = Some(worker);
                self.state = EngineState::Running;
                info!(
                    "File monitor started (check interval: {:.1}s)",
                    self.interval().as_secs_f64()
                );
                Ok(())
            }
            Err(err) => {
                self.state = EngineState::Stopped;
                error!("Failed to start file monitor: {}", err);
                Err(err)
            }
        }
    }

    /// Drop the subscription and join the worker.
    ///
    /// No event is applied to the store after this returns.
    pub fn stop(&mut self) -> Result<()> {
        if !self.is_running() {
            warn!("File monitor is not running");
            return Err(IndexError::NotRunning);
        }

        if let Some(worker) = self.worker.take() {
            worker.running.store(false, Ordering::SeqCst);
            drop(worker.watcher);
            if worker.handle.join().is_err() {
                error!("File monitor worker panicked");
            }
        }

        self.state = EngineState::Stopped;
        info!("File monitor stopped");
        Ok(())
    }

    /// Change the interval of every target.
    ///
    /// The subscription is built with the interval baked in, so a running
    /// monitor is stopped and started again.
    pub fn set_interval(&mut self, secs: f64) -> Result<()> {
        let interval = clamp_interval(secs);
        if self.targets.iter().all(|t| t.interval == interval) {
            return Ok(());
        }
        for target in &mut self.targets {
            target.interval = interval;
        }
        if self.is_running() {
            self.stop()?;
            self.start()?;
        }
        Ok(())
    }

    fn spawn_worker(&mut self) -> Result<Worker> {
        // Canonical roots so event paths match them
        let targets: Vec<WatchTarget> = self
            .targets
            .iter()
            .map(|t| {
                let mut target = t.clone();
                if let Ok(root) = std::fs::canonicalize(&t.root) {
                    target.root = root;
                }
                target
            })
            .collect();
        let first_root = targets.first().map(|t| t.root.clone()).unwrap_or_default();
        let tick = targets
            .iter()
            .map(|t| t.interval)
            .min()
            .unwrap_or(MIN_INTERVAL);

        let (tx, rx) = mpsc::channel::<notify::Result<Event>>();
        let mut watcher = RecommendedWatcher::new(tx, Config::default().with_poll_interval(tick))?;
        for target in &targets {
            let mode = if target.recursive {
                RecursiveMode::Recursive
            } else {
                RecursiveMode::NonRecursive
            };
            info!("Starting monitoring for path: {}", target.root.display());
            watcher.watch(&target.root, mode)?;
        }

        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let mut processor = ChangeProcessor::new(self.store.clone(), targets)
            .with_readiness(self.ready_timeout, self.ready_retry);

        let handle = thread::Builder::new()
            .name("fileindex-watcher".to_string())
            .spawn(move || {
                while flag.load(Ordering::SeqCst) {
                    match rx.recv_timeout(tick) {
                        Ok(Ok(event)) => {
                            for file_event in FileEvent::from_notify(&event) {
                                if !flag.load(Ordering::SeqCst) {
                                    break;
                                }
                                processor.handle(file_event);
                            }
                        }
                        Ok(Err(err)) => {
                            error!("File watcher error: {}", err);
                        }
                        Err(RecvTimeoutError::Timeout) => processor.prune(),
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                debug!("File monitor worker exiting");
            })
            .map_err(|e| IndexError::io(&first_root, e))?;

        Ok(Worker {
            watcher,
            running,
            handle,
        })
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        if self.is_running() {
            let _ = self.stop();
        }
    }
}
