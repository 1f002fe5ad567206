use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Receives advisory progress from a running check.
///
/// Units are ranges plus one per finalisation step. Called from worker
/// threads; implementations must not block for long.
pub trait ProgressListener: Send + Sync {
    /// Announces the units the run will advance through.
    fn started(&self, total: u64);
    /// Advances by `units`.
    fn advance(&self, units: u64);
    /// Called once when the run ends, successfully or not.
    fn finished(&self);
}

/// Listener that ignores everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoProgress;

impl ProgressListener for NoProgress {
    fn started(&self, _total: u64) {}
    fn advance(&self, _units: u64) {}
    fn finished(&self) {}
}

/// Shared [`NoProgress`] listener.
pub fn no_progress() -> Arc<dyn ProgressListener> {
    Arc::new(NoProgress)
}

/// Listener that keeps totals, for tests and polling callers.
#[derive(Debug, Default)]
pub struct CountingProgress {
    total: AtomicU64,
    done: AtomicU64,
    finished: AtomicBool,
}

impl CountingProgress {
    /// A listener with zeroed totals.
    pub fn new() -> Self {
        Self::default()
    }

    /// Units announced by `started`.
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Units advanced so far.
    pub fn done(&self) -> u64 {
        self.done.load(Ordering::Relaxed)
    }

    /// `true` once `finished` was called.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }
}

impl ProgressListener for CountingProgress {
    fn started(&self, total: u64) {
        self.total.store(total, Ordering::Relaxed);
        self.done.store(0, Ordering::Relaxed);
        self.finished.store(false, Ordering::Release);
    }

    fn advance(&self, units: u64) {
        self.done.fetch_add(units, Ordering::Relaxed);
    }

    fn finished(&self) {
        self.finished.store(true, Ordering::Release);
    }
}
