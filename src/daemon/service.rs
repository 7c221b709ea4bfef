//! The snapshot feed: the only surface presentation layers talk to.

use crate::common::paths::GardenConfig;
use crate::common::types::SessionSnapshot;
use crate::daemon::aggregator::SessionReader;
use crate::daemon::scheduler::{RefreshScheduler, TickReason};
use crate::daemon::watcher::{start_watcher, DataWatcher};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// One tick's ordered session list. Immutable once published.
pub type Snapshot = Arc<Vec<SessionSnapshot>>;

/// Owns the refresh pipeline and publishes a snapshot per tick
pub struct GardenService {
    /// Channel for broadcasting snapshots to subscribers
    snapshots: broadcast::Sender<Snapshot>,
    latest: Arc<RwLock<Snapshot>>,
    refresh_tx: mpsc::Sender<()>,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
    watcher: Option<Arc<Mutex<DataWatcher>>>,
}

impl GardenService {
    /// Start watching and ticking. Must be called inside a tokio runtime.
    ///
    /// A watcher that cannot be armed is logged and skipped; the poll timer
    /// keeps snapshots flowing without it.
    pub fn start(config: GardenConfig) -> Self {
        Self::start_with_reader(SessionReader::new(config))
    }

    pub fn start_with_reader(reader: SessionReader) -> Self {
        let config = reader.config().clone();
        let (snapshots, _) = broadcast::channel(16);
        let latest: Arc<RwLock<Snapshot>> = Arc::new(RwLock::new(Arc::new(Vec::new())));
        let (refresh_tx, refresh_rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (change_tx, change_rx) = mpsc::channel::<PathBuf>(256);

        let watcher = match start_watcher(&config.paths, change_tx) {
            Ok(watcher) => Some(Arc::new(Mutex::new(watcher))),
            Err(e) => {
                warn!("{}; falling back to polling", e);
                None
            }
        };

        let reader = Arc::new(reader);
        let tick_tx = snapshots.clone();
        let tick_latest = latest.clone();
        let tick_watcher = watcher.clone();
        let on_tick = move |reason: TickReason| {
            let reader = Arc::clone(&reader);
            let tx = tick_tx.clone();
            let latest = tick_latest.clone();
            if let Some(watcher) = &tick_watcher {
                let armed = watcher.lock().unwrap_or_else(|e| e.into_inner()).arm_pending();
                if armed > 0 {
                    debug!(armed, "watching new targets");
                }
            }
            async move {
                let started = Instant::now();
                match tokio::task::spawn_blocking(move || reader.read_sessions_now()).await {
                    Ok(sessions) => {
                        let snapshot: Snapshot = Arc::new(sessions);
                        *latest.write().unwrap_or_else(|e| e.into_inner()) = snapshot.clone();
                        debug!(
                            %reason,
                            sessions = snapshot.len(),
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "snapshot published"
                        );
                        // No subscribers is fine
                        let _ = tx.send(snapshot);
                    }
                    Err(e) => warn!("refresh tick failed: {}", e),
                }
            }
        };

        let scheduler = RefreshScheduler::new(config.debounce, config.poll_interval);
        let task = tokio::spawn(scheduler.run(change_rx, refresh_rx, shutdown_rx, on_tick));

        Self {
            snapshots,
            latest,
            refresh_tx,
            shutdown_tx,
            task,
            watcher,
        }
    }

    /// Receive every snapshot published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<Snapshot> {
        self.snapshots.subscribe()
    }

    /// Force a tick as soon as the current one (if any) finishes. Requests
    /// made while one is already queued collapse into it.
    pub fn refresh_now(&self) {
        let _ = self.refresh_tx.try_send(());
    }

    /// Most recently published snapshot (empty before the first tick)
    pub fn latest(&self) -> Snapshot {
        self.latest.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Whether file change notifications are active
    pub fn is_watching(&self) -> bool {
        self.watcher.is_some()
    }

    /// Paths with file change notifications armed
    pub fn watched_paths(&self) -> Vec<PathBuf> {
        self.watcher
            .as_ref()
            .map(|w| w.lock().unwrap_or_else(|e| e.into_inner()).watched().to_vec())
            .unwrap_or_default()
    }

    /// Stop the scheduler and wait for an in-flight tick to finish
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            warn!("refresh scheduler ended abnormally: {}", e);
        }
        if let Some(watcher) = &self.watcher {
            let dropped = watcher.lock().unwrap_or_else(|e| e.into_inner()).dropped_events();
            if dropped > 0 {
                debug!(dropped, "watch events dropped");
            }
        }
    }
}
