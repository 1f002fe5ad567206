use std::sync::atomic::{AtomicU64, Ordering};

/// Accounts bytes held by per-range caches and remembers the peak.
#[derive(Debug, Default)]
pub struct MemoryTracker {
    current: AtomicU64,
    peak: AtomicU64,
}

impl MemoryTracker {
    /// A tracker with nothing allocated.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `bytes` to the current usage and raises the peak if needed.
    pub fn allocate(&self, bytes: u64) {
        let now = self.current.fetch_add(bytes, Ordering::AcqRel) + bytes;
        self.peak.fetch_max(now, Ordering::AcqRel);
    }

    /// Subtracts `bytes`, saturating at zero.
    pub fn release(&self, bytes: u64) {
        let _ = self
            .current
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                Some(cur.saturating_sub(bytes))
            });
    }

    /// Allocates `bytes` until the returned guard is dropped.
    pub fn reserve(&self, bytes: u64) -> MemoryReservation<'_> {
        self.allocate(bytes);
        MemoryReservation {
            tracker: self,
            bytes,
        }
    }

    /// Bytes currently held.
    pub fn usage(&self) -> u64 {
        self.current.load(Ordering::Acquire)
    }

    /// Highest usage seen so far.
    pub fn peak(&self) -> u64 {
        self.peak.load(Ordering::Acquire)
    }
}

/// Releases its bytes on drop.
#[must_use]
pub struct MemoryReservation<'a> {
    tracker: &'a MemoryTracker,
    bytes: u64,
}

impl Drop for MemoryReservation<'_> {
    fn drop(&mut self) {
        self.tracker.release(self.bytes);
    }
}
