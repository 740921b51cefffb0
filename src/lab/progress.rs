//! Progress tracking for workload runs.
//!
//! Every (job, message) unit bumps a shared counter when it finishes and logs
//! a `completed/total` line at debug level. For long interactive runs a
//! [`ProgressMonitor`] can additionally emit a periodic summary at info level.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

/// Snapshot of run progress at a point in time.
#[derive(Debug, Clone)]
pub struct ProgressSnapshot {
    /// Units scheduled for this run, sampled-out units excluded.
    pub total: usize,
    /// Units that produced a non-error result.
    pub succeeded: usize,
    /// Units that produced an error result.
    pub failed: usize,
    /// Units skipped by the sampling gate.
    pub skipped: usize,
    pub elapsed: Duration,
}

impl ProgressSnapshot {
    /// Units finished so far.
    pub fn completed(&self) -> usize {
        self.succeeded + self.failed
    }

    /// Completion percentage in [0, 100].
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        (self.completed() as f64 / self.total as f64 * 100.0).min(100.0)
    }
}

/// Shared atomic counters for one run.
///
/// Cloned into the units of a run and incremented as each finishes.
#[derive(Debug, Clone, Default)]
pub struct ProgressCounters {
    total: Arc<AtomicUsize>,
    succeeded: Arc<AtomicUsize>,
    failed: Arc<AtomicUsize>,
    skipped: Arc<AtomicUsize>,
}

impl ProgressCounters {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add_scheduled(&self, n: usize) {
        self.total.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn add_skipped(&self, n: usize) {
        self.skipped.fetch_add(n, Ordering::Relaxed);
    }

    /// Records a finished unit and returns the number completed so far.
    pub(crate) fn record(&self, failed: bool) -> usize {
        if failed {
            self.failed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.succeeded.fetch_add(1, Ordering::Relaxed);
        }
        self.succeeded.load(Ordering::Relaxed) + self.failed.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> usize {
        self.total.load(Ordering::Relaxed)
    }

    /// Takes a snapshot of the current counter values.
    pub fn snapshot(&self, start: Instant) -> ProgressSnapshot {
        ProgressSnapshot {
            total: self.total.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            elapsed: start.elapsed(),
        }
    }
}

/// A background task that periodically logs run progress.
///
/// Call [`ProgressMonitor::stop`] once the run is over; dropping the monitor
/// also stops it at the next tick.
pub struct ProgressMonitor {
    stop_flag: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ProgressMonitor {
    /// Starts a monitor logging every `interval`.
    pub fn start(counters: ProgressCounters, label: impl Into<String>, interval: Duration) -> Self {
        let stop_flag = Arc::new(AtomicBool::new(false));
        let flag = stop_flag.clone();
        let label = label.into();
        let start = Instant::now();

        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.tick().await; // skip the immediate first tick

            loop {
                tick.tick().await;
                if flag.load(Ordering::Relaxed) {
                    break;
                }

                let snap = counters.snapshot(start);
                let elapsed_secs = snap.elapsed.as_secs_f64();
                let units_per_sec = if elapsed_secs > 0.0 {
                    snap.completed() as f64 / elapsed_secs
                } else {
                    0.0
                };

                tracing::info!(
                    run = %label,
                    completed = snap.completed(),
                    total = snap.total,
                    failed = snap.failed,
                    skipped = snap.skipped,
                    progress_pct = format!("{:.1}%", snap.percent()),
                    elapsed_secs = snap.elapsed.as_secs(),
                    units_per_sec = format!("{:.2}", units_per_sec),
                    "Workload progress"
                );
            }
        });

        Self {
            stop_flag,
            handle: Some(handle),
        }
    }

    /// Signals the monitor to stop and waits for it.
    pub async fn stop(mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            handle.abort();
            let _ = handle.await;
        }
    }
}

impl Drop for ProgressMonitor {
    fn drop(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
    }
}
