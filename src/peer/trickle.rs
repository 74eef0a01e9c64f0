//! Trickle quiescence debouncing
//!
//! Trickled candidates arrive in bursts; restarting connectivity checks on
//! every arrival would be wasteful, so the session arms one watcher on the
//! first candidate and starts checks only after a quiet window with no new
//! arrivals. The watcher is tied to the session's shutdown signal so it
//! never outlives a torn-down session.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;

/// One-shot quiescence watcher for a burst of trickled candidates
pub(crate) struct TrickleDebouncer {
    quiet: Duration,
    last_arrival: Mutex<Instant>,
    armed: AtomicBool,
}

impl TrickleDebouncer {
    pub(crate) fn new(quiet: Duration) -> Self {
        Self {
            quiet,
            last_arrival: Mutex::new(Instant::now()),
            armed: AtomicBool::new(false),
        }
    }

    /// Stamp a candidate arrival, pushing the quiet window out
    pub(crate) fn record_arrival(&self) {
        let mut last = self
            .last_arrival
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *last = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        let last = self
            .last_arrival
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        last.elapsed()
    }

    /// Arm the watcher. The first call spawns the watch task and returns
    /// true; later calls are no-ops returning false, so a session can call
    /// this on every candidate without restarting the watcher.
    ///
    /// `on_quiet` runs exactly once, after no arrival has been recorded for
    /// at least the quiet window. A shutdown signal (or the sender being
    /// dropped) cancels the watcher without firing.
    pub(crate) fn arm(
        self: &Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
        on_quiet: impl FnOnce() + Send + 'static,
    ) -> bool {
        if self.armed.swap(true, Ordering::SeqCst) {
            return false;
        }

        let debouncer = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(debouncer.quiet) => {}
                    _ = shutdown.changed() => {
                        debug!("trickle watcher canceled before connectivity start");
                        return;
                    }
                }
                if debouncer.idle_for() >= debouncer.quiet {
                    break;
                }
            }
            on_quiet();
        });
        true
    }
}
