//! File system watcher for the agent's data directory.
//!
//! Forwards change notifications on the data directory, todo directory, task
//! root and projects root to the refresh scheduler. Delivery is best effort:
//! a full channel drops the event and the poll timer catches up.

use crate::common::error::GardenError;
use crate::common::paths::GardenPaths;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Running watcher. Dropping it stops the watch.
pub struct DataWatcher {
    watcher: RecommendedWatcher,
    paths: GardenPaths,
    dropped: Arc<AtomicU64>,
    watched: Vec<PathBuf>,
    /// Targets missing so far; armed by [`DataWatcher::arm_pending`]
    pending: Vec<PathBuf>,
}

impl DataWatcher {
    /// Events lost to a full channel since start
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Targets being watched
    pub fn watched(&self) -> &[PathBuf] {
        &self.watched
    }

    /// Targets that did not exist yet when last checked
    pub fn pending(&self) -> &[PathBuf] {
        &self.pending
    }

    /// Watch pending targets that exist now. Returns how many were armed.
    ///
    /// Cheap when nothing is pending; the service calls it every tick. A
    /// target that fails to arm is dropped and left to the poll timer.
    pub fn arm_pending(&mut self) -> usize {
        if self.pending.is_empty() {
            return 0;
        }

        let mut armed = 0;
        for target in std::mem::take(&mut self.pending) {
            if !target.exists() {
                self.pending.push(target);
                continue;
            }
            match arm(&mut self.watcher, &target, &self.paths) {
                Ok(()) => {
                    debug!(path = %target.display(), "watch armed");
                    self.watched.push(target);
                    armed += 1;
                }
                Err(e) => warn!("{}; relying on poll", e),
            }
        }
        armed
    }
}

/// Our own reads show up as access events; only writes matter
fn is_change(kind: &EventKind) -> bool {
    !matches!(kind, EventKind::Access(_))
}

fn recursive_mode(path: &Path, paths: &GardenPaths) -> RecursiveMode {
    if path == paths.tasks_dir || path == paths.projects_dir {
        RecursiveMode::Recursive
    } else {
        RecursiveMode::NonRecursive
    }
}

fn arm(watcher: &mut RecommendedWatcher, target: &Path, paths: &GardenPaths) -> Result<(), GardenError> {
    watcher
        .watch(target, recursive_mode(target, paths))
        .map_err(|source| GardenError::Watch {
            path: target.to_path_buf(),
            source,
        })
}

/// Watch every existing target. Missing targets stay pending until
/// [`DataWatcher::arm_pending`] finds them; the poll covers the gap.
pub fn start_watcher(
    paths: &GardenPaths,
    tx: mpsc::Sender<PathBuf>,
) -> Result<DataWatcher, GardenError> {
    let dropped = Arc::new(AtomicU64::new(0));
    let dropped_counter = dropped.clone();

    let mut watcher = notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| {
        match res {
            Ok(event) => {
                if !is_change(&event.kind) {
                    return;
                }
                let Some(path) = event.paths.into_iter().next() else {
                    return;
                };
                if tx.try_send(path).is_err() {
                    let count = dropped_counter.fetch_add(1, Ordering::Relaxed) + 1;
                    if count == 1 || count % 100 == 0 {
                        warn!(dropped_total = count, "watch channel full, event dropped");
                    }
                }
            }
            Err(e) => warn!("File watcher error: {}", e),
        }
    })?;

    let mut watched = Vec::new();
    let mut pending = Vec::new();
    for target in paths.watch_targets() {
        if !target.exists() {
            info!("{} does not exist yet; relying on poll", target.display());
            pending.push(target.to_path_buf());
            continue;
        }
        arm(&mut watcher, target, paths)?;
        watched.push(target.to_path_buf());
    }
    info!(
        targets = watched.len(),
        pending = pending.len(),
        "watching {}",
        paths.claude_dir.display()
    );

    Ok(DataWatcher {
        watcher,
        paths: paths.clone(),
        dropped,
        watched,
        pending,
    })
}
