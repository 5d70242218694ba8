//! File change watching for the filesystem storage.
//!
//! An OS watcher marks touched paths dirty; the storage's change probe
//! combines that dirty set with an mtime+length snapshot comparison, so
//! change detection still works when the platform watcher is unavailable.

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, warn};

/// Size + mtime fingerprint of a file at the last check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    len: u64,
    modified: Option<SystemTime>,
}

fn stamp_of(path: &Path) -> Option<FileStamp> {
    let meta = std::fs::metadata(path).ok()?;
    Some(FileStamp {
        len: meta.len(),
        modified: meta.modified().ok(),
    })
}

pub struct FileChangeWatcher {
    dirty: Arc<Mutex<HashSet<PathBuf>>>,
    watcher: Mutex<Option<RecommendedWatcher>>,
    watched_dirs: Mutex<HashSet<PathBuf>>,
    stamps: Mutex<HashMap<PathBuf, Option<FileStamp>>>,
}

impl FileChangeWatcher {
    pub fn new() -> Self {
        let dirty: Arc<Mutex<HashSet<PathBuf>>> = Arc::new(Mutex::new(HashSet::new()));
        let sink = dirty.clone();
        let watcher = match notify::recommended_watcher(
            move |result: Result<notify::Event, notify::Error>| match result {
                Ok(event) => {
                    let mut set = sink.lock();
                    for path in event.paths {
                        set.insert(path);
                    }
                }
                Err(e) => warn!("file watcher error: {}", e),
            },
        ) {
            Ok(w) => Some(w),
            Err(e) => {
                warn!("platform file watcher unavailable, falling back to stamps: {}", e);
                None
            }
        };
        Self {
            dirty,
            watcher: Mutex::new(watcher),
            watched_dirs: Mutex::new(HashSet::new()),
            stamps: Mutex::new(HashMap::new()),
        }
    }

    /// Watch a directory (non-recursively) for events.
    pub fn watch_dir(&self, dir: &Path) {
        {
            let mut dirs = self.watched_dirs.lock();
            if !dirs.insert(dir.to_path_buf()) {
                return;
            }
        }
        if let Some(watcher) = self.watcher.lock().as_mut() {
            if let Err(e) = watcher.watch(dir, RecursiveMode::NonRecursive) {
                debug!("cannot watch {}: {}", dir.display(), e);
            }
        }
    }

    /// Record the current fingerprint of a file; the next `has_changed`
    /// compares against it.
    pub fn record(&self, path: &Path) {
        self.stamps
            .lock()
            .insert(path.to_path_buf(), stamp_of(path));
    }

    /// Whether the file changed since it was last recorded or checked.
    ///
    /// A watcher event counts as a change even when the fingerprint cannot
    /// tell (same length, coarse mtime). Erring towards over-notification
    /// is the intended trade-off; the per-entry differ downstream suppresses
    /// value-identical updates.
    pub fn has_changed(&self, path: &Path) -> bool {
        let was_dirty = self.dirty.lock().remove(path);
        let current = stamp_of(path);
        let mut stamps = self.stamps.lock();
        match stamps.get(path) {
            Some(previous) => {
                let changed = *previous != current;
                if changed {
                    stamps.insert(path.to_path_buf(), current);
                }
                changed || was_dirty
            }
            None => {
                // First sighting; establish the baseline.
                stamps.insert(path.to_path_buf(), current);
                false
            }
        }
    }
}

impl Default for FileChangeWatcher {
    fn default() -> Self {
        Self::new()
    }
}
