//! Debounced Filesystem Observer.
//!
//! Watches a configured root to a fixed depth and emits at most one
//! `Added`/`Removed` event per settled path per debounce window. A per-key
//! generation counter implements reset-on-write debouncing without holding
//! a lock across any `.await`; a write-stabilization poll additionally
//! withholds delivery until the path's mtime stops changing.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use notify::{Config as NotifyConfig, Event as NotifyEvent, RecommendedWatcher, RecursiveMode, Watcher as _};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, warn};

use crate::config::WatcherConfig;

const SYSTEM_DIRS: &[&str] = &[
    "node_modules",
    ".git",
    "dist",
    "build",
    "target",
    "coverage",
    "__pycache__",
    "vendor",
    ".vscode",
    ".idea",
    ".next",
    "out",
    ".cache",
    ".svn",
    ".hg",
];

const STABILITY_POLL_MS: u64 = 250;
const PERMISSION_ERROR_THRESHOLD: usize = 20;

#[derive(Debug, Clone)]
pub enum WatchEvent {
    Added(PathBuf),
    Removed(PathBuf),
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Kind {
    Added,
    Removed,
}

struct PendingEntry {
    generation: u64,
    kind: Kind,
}

/// Debounced filesystem observer over a single root directory.
pub struct DebouncedObserver {
    config: WatcherConfig,
    tx: mpsc::Sender<WatchEvent>,
    pending: Arc<Mutex<HashMap<PathBuf, PendingEntry>>>,
    permission_errors: Arc<AtomicUsize>,
    healthy: Arc<AtomicBool>,
    _watcher: Option<RecommendedWatcher>,
}

fn is_system_dir(name: &str) -> bool {
    SYSTEM_DIRS.iter().any(|d| d.eq_ignore_ascii_case(name))
}

/// Map a raw changed path to the ancestor that sits exactly `depth` path
/// components below `root`, i.e. the project directory this observer
/// reports on. Returns `None` for events on the root itself or above depth.
fn path_at_depth(root: &Path, changed: &Path, depth: usize) -> Option<PathBuf> {
    let relative = changed.strip_prefix(root).ok()?;
    let mut components = relative.components();
    let mut acc = root.to_path_buf();
    for _ in 0..depth {
        let next = components.next()?;
        acc.push(next.as_os_str());
    }
    if acc == root {
        return None;
    }
    let name = acc.file_name()?.to_string_lossy().to_string();
    if name.starts_with('.') || is_system_dir(&name) {
        return None;
    }
    Some(acc)
}

impl DebouncedObserver {
    pub fn new(config: WatcherConfig) -> (Self, mpsc::Receiver<WatchEvent>) {
        let (tx, rx) = mpsc::channel(256);
        (
            Self {
                config,
                tx,
                pending: Arc::new(Mutex::new(HashMap::new())),
                permission_errors: Arc::new(AtomicUsize::new(0)),
                healthy: Arc::new(AtomicBool::new(true)),
                _watcher: None,
            },
            rx,
        )
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    /// Start watching. The underlying `notify` watcher is kept alive on
    /// `self` for the observer's lifetime.
    pub fn start(&mut self) -> Result<(), crate::error::PipelineError> {
        let root = PathBuf::from(&self.config.watch_path);
        let depth = self.config.depth.max(1);
        let debounce_delay = Duration::from_millis(self.config.debounce_delay_ms);
        let stability_threshold = Duration::from_millis(self.config.stability_threshold_ms);

        let pending = self.pending.clone();
        let tx = self.tx.clone();
        let permission_errors = self.permission_errors.clone();
        let healthy = self.healthy.clone();
        let root_for_cb = root.clone();

        let (raw_tx, mut raw_rx) = mpsc::unbounded_channel::<notify::Result<NotifyEvent>>();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<NotifyEvent>| {
                let _ = raw_tx.send(res);
            },
            NotifyConfig::default(),
        )
        .map_err(|e| crate::error::PipelineError::Configuration(format!("watcher init: {e}")))?;

        watcher
            .watch(&root, RecursiveMode::Recursive)
            .map_err(|e| {
                crate::error::PipelineError::Configuration(format!(
                    "cannot watch {}: {e}",
                    root.display()
                ))
            })?;

        self._watcher = Some(watcher);

        tokio::spawn(async move {
            while let Some(res) = raw_rx.recv().await {
                match res {
                    Ok(event) => {
                        for changed in event.paths {
                            let Some(target) = path_at_depth(&root_for_cb, &changed, depth) else {
                                continue;
                            };
                            let kind = if target.exists() {
                                Kind::Added
                            } else {
                                Kind::Removed
                            };
                            schedule(
                                target,
                                kind,
                                pending.clone(),
                                tx.clone(),
                                debounce_delay,
                                stability_threshold,
                            )
                            .await;
                        }
                    }
                    Err(e) => {
                        warn!("filesystem watch error: {e}");
                        if matches!(e.kind, notify::ErrorKind::PathNotFound)
                            || e.to_string().to_lowercase().contains("permission")
                        {
                            let count = permission_errors.fetch_add(1, Ordering::Relaxed) + 1;
                            if count >= PERMISSION_ERROR_THRESHOLD {
                                error!("observer unhealthy after {count} permission errors");
                                healthy.store(false, Ordering::Relaxed);
                                break;
                            }
                        }
                    }
                }
            }
        });

        Ok(())
    }

    /// Immediately fire every pending debounced event, bypassing the
    /// remaining delay and stability check.
    pub async fn flush_all(&self) {
        let mut pending = self.pending.lock().await;
        for (path, entry) in pending.drain() {
            let event = match entry.kind {
                Kind::Added => WatchEvent::Added(path),
                Kind::Removed => WatchEvent::Removed(path),
            };
            let _ = self.tx.send(event).await;
        }
    }

    /// Discard every pending debounced event without firing it.
    pub async fn cancel_all(&self) {
        self.pending.lock().await.clear();
    }
}

async fn schedule(
    path: PathBuf,
    kind: Kind,
    pending: Arc<Mutex<HashMap<PathBuf, PendingEntry>>>,
    tx: mpsc::Sender<WatchEvent>,
    debounce_delay: Duration,
    stability_threshold: Duration,
) {
    let generation = {
        let mut guard = pending.lock().await;
        let entry = guard.entry(path.clone()).or_insert(PendingEntry {
            generation: 0,
            kind,
        });
        entry.generation += 1;
        entry.kind = kind;
        entry.generation
    };

    tokio::spawn(async move {
        tokio::time::sleep(debounce_delay).await;

        {
            let guard = pending.lock().await;
            match guard.get(&path) {
                Some(entry) if entry.generation == generation => {}
                _ => return, // superseded by a newer event for this key
            }
        }

        if kind == Kind::Added {
            if !wait_for_stability(&path, stability_threshold, &pending, generation).await {
                return; // superseded mid-stability-check
            }
        }

        let mut guard = pending.lock().await;
        match guard.get(&path) {
            Some(entry) if entry.generation == generation => {
                guard.remove(&path);
                drop(guard);
                let event = match kind {
                    Kind::Added => WatchEvent::Added(path),
                    Kind::Removed => WatchEvent::Removed(path),
                };
                if tx.send(event).await.is_err() {
                    debug!("watch event receiver dropped");
                }
            }
            _ => {}
        }
    });
}

/// Poll the path's mtime until it has not changed for `threshold`, or
/// return `false` early if a newer generation supersedes this one.
async fn wait_for_stability(
    path: &Path,
    threshold: Duration,
    pending: &Arc<Mutex<HashMap<PathBuf, PendingEntry>>>,
    generation: u64,
) -> bool {
    let mut last_mtime = std::fs::metadata(path).and_then(|m| m.modified()).ok();
    let mut stable_since = tokio::time::Instant::now();

    loop {
        {
            let guard = pending.lock().await;
            match guard.get(path) {
                Some(entry) if entry.generation == generation => {}
                _ => return false,
            }
        }

        if tokio::time::Instant::now().duration_since(stable_since) >= threshold {
            return true;
        }

        tokio::time::sleep(Duration::from_millis(STABILITY_POLL_MS)).await;

        let current_mtime = std::fs::metadata(path).and_then(|m| m.modified()).ok();
        if current_mtime != last_mtime {
            last_mtime = current_mtime;
            stable_since = tokio::time::Instant::now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_direct_child_at_depth_one() {
        let root = PathBuf::from("/watch");
        let changed = PathBuf::from("/watch/demo/src/index.ts");
        assert_eq!(
            path_at_depth(&root, &changed, 1),
            Some(PathBuf::from("/watch/demo"))
        );
    }

    #[test]
    fn ignores_root_itself() {
        let root = PathBuf::from("/watch");
        assert_eq!(path_at_depth(&root, &root, 1), None);
    }

    #[test]
    fn ignores_system_directories() {
        let root = PathBuf::from("/watch");
        let changed = PathBuf::from("/watch/node_modules/pkg/index.js");
        assert_eq!(path_at_depth(&root, &changed, 1), None);
    }

    #[test]
    fn ignores_dotdirs() {
        let root = PathBuf::from("/watch");
        let changed = PathBuf::from("/watch/.hidden/file.rs");
        assert_eq!(path_at_depth(&root, &changed, 1), None);
    }

    #[tokio::test]
    async fn rapid_repeated_events_collapse_to_latest_generation() {
        let (observer, mut rx) = DebouncedObserver::new(WatcherConfig {
            watch_path: "/watch".into(),
            depth: 1,
            ignore_patterns: vec![],
            debounce_delay_ms: 50,
            stability_threshold_ms: 0,
            startup_delay_ms: 0,
        });
        let path = PathBuf::from("/watch/demo");
        for _ in 0..3 {
            schedule(
                path.clone(),
                Kind::Added,
                observer.pending.clone(),
                observer.tx.clone(),
                Duration::from_millis(50),
                Duration::from_millis(0),
            )
            .await;
        }
        let event = tokio::time::timeout(Duration::from_millis(500), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, WatchEvent::Added(p) if p == path));
        assert!(tokio::time::timeout(Duration::from_millis(200), rx.recv())
            .await
            .is_err());
    }
}
