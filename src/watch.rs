use crate::index::IndexHandle;
use crate::indexer::{Indexer, scan};
use anyhow::Result;
use clap::ValueEnum;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const DEFAULT_DEBOUNCE_MS: u64 = 300;
const DEFAULT_FALLBACK_SCAN_SECS: u64 = 30;
const IDLE_POLL: Duration = Duration::from_millis(200);

#[derive(ValueEnum, Clone, Copy, Debug, Eq, PartialEq)]
pub enum WatchMode {
    Off,
    Auto,
    On,
}

#[derive(Clone, Debug)]
pub struct WatchConfig {
    pub mode: WatchMode,
    pub debounce: Duration,
    pub fallback_scan: Duration,
    /// Where each published rebuild is also saved.
    pub save_to: Option<PathBuf>,
}

impl WatchConfig {
    pub fn new(mode: WatchMode, debounce_ms: u64, fallback_scan_secs: u64) -> Self {
        Self {
            mode,
            debounce: Duration::from_millis(debounce_ms.max(1)),
            fallback_scan: Duration::from_secs(fallback_scan_secs.max(1)),
            save_to: None,
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self::new(WatchMode::Auto, DEFAULT_DEBOUNCE_MS, DEFAULT_FALLBACK_SCAN_SECS)
    }
}

pub struct WatchHandle {
    stop: Sender<()>,
    thread: Option<thread::JoinHandle<()>>,
}

impl WatchHandle {
    pub fn stop(mut self) {
        let _ = self.stop.send(());
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        let _ = self.stop.send(());
    }
}

/// Rebuilds the whole index after filesystem changes settle and publishes it
/// through `handle`. `WatchMode::On` fails when native watching is unavailable;
/// `Auto` falls back to periodic fingerprint scans.
pub fn start(
    indexer: Arc<Indexer>,
    handle: Arc<IndexHandle>,
    config: WatchConfig,
) -> Result<Option<WatchHandle>> {
    if config.mode == WatchMode::Off {
        return Ok(None);
    }
    let (ready_tx, ready_rx) = mpsc::channel();
    let (stop_tx, stop_rx) = mpsc::channel();
    let thread = thread::spawn(move || {
        if let Err(err) = run_loop(&indexer, &handle, &config, stop_rx, ready_tx) {
            warn!("watch error: {err:#}");
        }
    });
    match ready_rx.recv_timeout(Duration::from_secs(2)) {
        Ok(Err(err)) => Err(err),
        Ok(Ok(())) | Err(_) => Ok(Some(WatchHandle {
            stop: stop_tx,
            thread: Some(thread),
        })),
    }
}

fn run_loop(
    indexer: &Indexer,
    handle: &IndexHandle,
    config: &WatchConfig,
    stop_rx: Receiver<()>,
    ready: Sender<Result<()>>,
) -> Result<()> {
    let root = indexer.repo_root().to_path_buf();
    let (mut watcher, mut event_rx) = match try_start_watcher(&root) {
        Ok((watcher, rx)) => {
            let _ = ready.send(Ok(()));
            (Some(watcher), Some(rx))
        }
        Err(err) => {
            if config.mode == WatchMode::On {
                let _ = ready.send(Err(err));
                return Ok(());
            }
            warn!("watch disabled, falling back to scan: {err:#}");
            let _ = ready.send(Ok(()));
            (None, None)
        }
    };
    info!("watching {}", root.display());

    let mut dirty = false;
    let mut last_event = Instant::now();
    let mut last_fallback = Instant::now();

    loop {
        if stop_requested(&stop_rx) {
            return Ok(());
        }

        if watcher.is_some() {
            let Some(rx) = event_rx.as_ref() else {
                watcher = None;
                continue;
            };
            match rx.recv_timeout(config.debounce) {
                Ok(Ok(event)) => {
                    if event.need_rescan() || is_relevant_event(&event, &root) {
                        dirty = true;
                        last_event = Instant::now();
                    }
                }
                Ok(Err(err)) => {
                    if should_fallback(&err, config.mode) {
                        warn!("watch fallback to scan: {err}");
                        watcher = None;
                        event_rx = None;
                        dirty = true;
                    } else {
                        warn!("watch error: {err}");
                    }
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {}
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    if config.mode != WatchMode::Auto {
                        return Ok(());
                    }
                    watcher = None;
                    event_rx = None;
                    dirty = true;
                }
            }
            if dirty && last_event.elapsed() >= config.debounce {
                dirty = false;
                if let Err(err) = rebuild(indexer, handle, config) {
                    warn!("watch rebuild failed: {err:#}");
                }
            }
        } else if dirty || last_fallback.elapsed() >= config.fallback_scan {
            dirty = false;
            last_fallback = Instant::now();
            if let Err(err) = fallback_scan(indexer, handle, config) {
                warn!("watch fallback scan failed: {err:#}");
            }
        } else {
            thread::sleep(IDLE_POLL);
        }
    }
}

fn stop_requested(stop_rx: &Receiver<()>) -> bool {
    match stop_rx.try_recv() {
        Ok(()) => true,
        Err(TryRecvError::Disconnected) => true,
        Err(TryRecvError::Empty) => false,
    }
}

fn try_start_watcher(
    repo_root: &Path,
) -> Result<(RecommendedWatcher, Receiver<notify::Result<Event>>)> {
    let (event_tx, event_rx) = mpsc::channel();
    let handler = move |res| {
        let _ = event_tx.send(res);
    };
    let mut watcher = notify::recommended_watcher(handler)?;
    watcher.watch(repo_root, RecursiveMode::Recursive)?;
    Ok((watcher, event_rx))
}

/// Rebuilds only when the scanned tree's fingerprint moved.
fn fallback_scan(indexer: &Indexer, handle: &IndexHandle, config: &WatchConfig) -> Result<()> {
    let scanned = scan::scan_repo(
        indexer.repo_root(),
        indexer.scan_options(),
        indexer.ignore_filter(),
    )?;
    let current = handle.snapshot();
    if scan::fingerprint(&scanned) == current.document().metadata.fingerprint {
        debug!("watch fallback: no changes");
        return Ok(());
    }
    rebuild(indexer, handle, config)
}

fn rebuild(indexer: &Indexer, handle: &IndexHandle, config: &WatchConfig) -> Result<()> {
    let build = indexer.build()?;
    let current = handle.snapshot();
    if build.index.document() == current.document() {
        debug!("watch rebuild: index unchanged");
        return Ok(());
    }
    if let Some(path) = &config.save_to {
        build.index.save(path)?;
    }
    handle.publish(build.index);
    info!(
        "watch published rebuild: {} files, {} functions",
        build.stats.indexed, build.stats.functions
    );
    Ok(())
}

fn is_relevant_event(event: &Event, root: &Path) -> bool {
    if matches!(event.kind, EventKind::Access(_)) {
        return false;
    }
    event.paths.iter().any(|path| is_relevant_path(path, root))
}

/// Python sources and ignore/manifest files outside `.git` and the output dir.
fn is_relevant_path(path: &Path, root: &Path) -> bool {
    let Ok(rel) = path.strip_prefix(root) else {
        return false;
    };
    let mut components = rel.components();
    match components.next() {
        Some(Component::Normal(first)) => {
            if first == ".git" || first == scan::OUTPUT_DIR {
                return false;
            }
        }
        _ => return false,
    }
    if scan::is_subject_file(path) {
        return true;
    }
    let name = path.file_name().and_then(|name| name.to_str()).unwrap_or("");
    name == ".gitignore" || name == ".ignore" || name.ends_with(".txt")
}

fn should_fallback(err: &notify::Error, mode: WatchMode) -> bool {
    if mode != WatchMode::Auto {
        return false;
    }
    matches!(
        &err.kind,
        notify::ErrorKind::MaxFilesWatch
            | notify::ErrorKind::WatchNotFound
            | notify::ErrorKind::PathNotFound
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind};

    #[test]
    fn only_python_and_ignore_files_are_relevant() {
        let root = Path::new("/repo");
        assert!(is_relevant_path(Path::new("/repo/pkg/mod.py"), root));
        assert!(is_relevant_path(Path::new("/repo/.gitignore"), root));
        assert!(is_relevant_path(Path::new("/repo/requirements.txt"), root));
        assert!(!is_relevant_path(Path::new("/repo/README.md"), root));
        assert!(!is_relevant_path(Path::new("/repo/.git/index"), root));
        assert!(!is_relevant_path(Path::new("/repo/.codemap/index.json"), root));
        assert!(!is_relevant_path(Path::new("/elsewhere/a.py"), root));
    }

    #[test]
    fn access_events_are_noise() {
        let root = Path::new("/repo");
        let access = Event::new(EventKind::Access(AccessKind::Any))
            .add_path(PathBuf::from("/repo/a.py"));
        assert!(!is_relevant_event(&access, root));
        let create = Event::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("/repo/a.py"));
        assert!(is_relevant_event(&create, root));
    }

    #[test]
    fn off_mode_starts_nothing() {
        let dir = tempfile::TempDir::new().unwrap();
        let indexer = Arc::new(Indexer::new(dir.path().to_path_buf()).unwrap());
        let build = indexer.build().unwrap();
        let handle = Arc::new(IndexHandle::new(build.index));
        let config = WatchConfig::new(WatchMode::Off, 10, 1);
        assert!(start(indexer, handle, config).unwrap().is_none());
    }

    #[test]
    fn fallback_scan_publishes_changed_tree() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.py"), "def a():\n    pass\n").unwrap();
        let indexer = Indexer::new(dir.path().to_path_buf()).unwrap();
        let handle = IndexHandle::new(indexer.build().unwrap().index);
        let config = WatchConfig::default();

        fallback_scan(&indexer, &handle, &config).unwrap();
        let before = handle.snapshot();
        assert!(before.symbol("a.b").is_none());

        std::fs::write(dir.path().join("a.py"), "def a():\n    pass\n\ndef b():\n    a()\n").unwrap();
        fallback_scan(&indexer, &handle, &config).unwrap();
        let after = handle.snapshot();
        assert!(after.symbol("a.b").is_some());
        assert!(before.symbol("a.b").is_none());
    }
}
