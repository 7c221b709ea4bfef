//! Refresh scheduling.
//!
//! One loop decides when a tick runs: debounced file changes, the poll
//! timer and explicit refresh requests all funnel into the same trigger, so
//! a burst of changes never produces two ticks and a poll tick satisfies any
//! pending change.

use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{info, trace};

/// Why a tick ran
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickReason {
    /// Poll timer, including the immediate first tick
    Poll,
    /// Debounce window after a file change elapsed
    Changed,
    /// Caller asked for a refresh
    Requested,
}

impl fmt::Display for TickReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TickReason::Poll => write!(f, "poll"),
            TickReason::Changed => write!(f, "changed"),
            TickReason::Requested => write!(f, "requested"),
        }
    }
}

/// Debounce state. The first change of a burst arms a deadline one window
/// out; later changes in the burst do not move it.
#[derive(Debug)]
pub struct TickGate {
    window: Duration,
    due: Option<Instant>,
}

impl TickGate {
    pub fn new(window: Duration) -> Self {
        Self { window, due: None }
    }

    /// Record a change, returning when the coalesced tick is due
    pub fn note_change(&mut self, now: Instant) -> Instant {
        *self.due.get_or_insert(now + self.window)
    }

    pub fn due(&self) -> Option<Instant> {
        self.due
    }

    /// A tick ran; pending changes are covered by it
    pub fn clear(&mut self) {
        self.due = None;
    }
}

/// Drives ticks until shutdown
pub struct RefreshScheduler {
    debounce: Duration,
    poll_interval: Duration,
}

impl RefreshScheduler {
    pub fn new(debounce: Duration, poll_interval: Duration) -> Self {
        Self {
            debounce,
            poll_interval,
        }
    }

    /// Run the loop. Ticks are awaited one at a time, so `on_tick` never
    /// overlaps itself. The first poll tick fires immediately.
    pub async fn run<F, Fut>(
        self,
        mut changes: mpsc::Receiver<PathBuf>,
        mut requests: mpsc::Receiver<()>,
        mut shutdown: watch::Receiver<bool>,
        mut on_tick: F,
    ) where
        F: FnMut(TickReason) -> Fut,
        Fut: Future<Output = ()>,
    {
        let mut gate = TickGate::new(self.debounce);
        let mut poll = time::interval(self.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            debounce_ms = self.debounce.as_millis() as u64,
            poll_ms = self.poll_interval.as_millis() as u64,
            "refresh scheduler started"
        );

        loop {
            let deadline = gate.due();
            let reason = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                Some(()) = requests.recv() => TickReason::Requested,
                _ = time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    TickReason::Changed
                }
                _ = poll.tick() => TickReason::Poll,
                Some(path) = changes.recv() => {
                    let due = gate.note_change(Instant::now());
                    trace!(path = %path.display(), in_ms = due.saturating_duration_since(Instant::now()).as_millis() as u64, "change noted");
                    continue;
                }
            };

            gate.clear();
            trace!(%reason, "tick");
            on_tick(reason).await;
        }

        info!("refresh scheduler stopped");
    }
}
