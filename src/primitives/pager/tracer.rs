//! Page fault and eviction tracing.
//!
//! Every page-cache miss opens a [`PageFaultEvent`]. The event accumulates the
//! bytes read from the backing file, may open exactly one nested
//! [`EvictionEvent`] when an occupied frame has to be reclaimed, and is
//! finalised exactly once, either by [`PageFaultEvent::close`] or when it is
//! dropped on an early-return path. Closing consumes the event, so using it
//! afterwards is rejected at compile time:
//!
//! ```compile_fail
//! use sombra_check::primitives::pager::{NullTracer, PageFaultEvent};
//! use sombra_check::types::PageId;
//!
//! let tracer = NullTracer;
//! let mut fault = PageFaultEvent::begin(&tracer, PageId(3));
//! fault.add_bytes_read(8192);
//! fault.close();
//! fault.add_bytes_read(1);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::types::PageId;

/// Violations of the fault event lifecycle.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TraceError {
    /// `begin_eviction` was called a second time for the same fault.
    #[error("eviction already begun for this page fault")]
    EvictionAlreadyBegun,
}

/// Final state of a page fault, handed to the tracer when the event closes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FaultRecord {
    /// Page of the backing file that missed.
    pub file_page_id: PageId,
    /// Cache frame used to satisfy the fault.
    pub cache_page_id: Option<u64>,
    /// Bytes read from the backing file.
    pub bytes_read: u64,
    /// Free frames available when the fault started.
    pub free_list_size: Option<usize>,
    /// Whether an eviction was needed.
    pub evicted: bool,
    /// Failure message when the read did not complete.
    pub failure: Option<String>,
}

/// Final state of an eviction performed on behalf of a fault.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EvictionRecord {
    /// Frame that was reclaimed.
    pub cache_page_id: u64,
    /// File page that occupied the frame, when known.
    pub file_page_id: Option<PageId>,
    /// Failure message when the eviction did not complete.
    pub failure: Option<String>,
}

/// Sink for page-cache events.
///
/// Implementations must be cheap: `fault_closed` runs on every cache miss.
pub trait PageCacheTracer: Send + Sync {
    /// Called once per fault when its event is finalised.
    fn fault_closed(&self, _fault: &FaultRecord) {}

    /// Called once per eviction when its event is finalised.
    fn eviction_closed(&self, _eviction: &EvictionRecord) {}

    /// Aggregated counters, when the tracer keeps any.
    fn snapshot(&self) -> Option<TracerSnapshot> {
        None
    }
}

/// Tracer that discards every event.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullTracer;

impl PageCacheTracer for NullTracer {}

/// Returns a shared no-op tracer.
pub fn null_tracer() -> Arc<dyn PageCacheTracer> {
    Arc::new(NullTracer)
}

/// Aggregated fault and eviction counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TracerSnapshot {
    /// Page faults observed.
    pub faults: u64,
    /// Faults whose read failed.
    pub failed_faults: u64,
    /// Bytes read by all faults.
    pub bytes_read: u64,
    /// Evictions performed.
    pub evictions: u64,
    /// Evictions that failed.
    pub failed_evictions: u64,
}

impl TracerSnapshot {
    /// Counter growth between `earlier` and `self`.
    pub fn since(&self, earlier: &TracerSnapshot) -> TracerSnapshot {
        TracerSnapshot {
            faults: self.faults.saturating_sub(earlier.faults),
            failed_faults: self.failed_faults.saturating_sub(earlier.failed_faults),
            bytes_read: self.bytes_read.saturating_sub(earlier.bytes_read),
            evictions: self.evictions.saturating_sub(earlier.evictions),
            failed_evictions: self
                .failed_evictions
                .saturating_sub(earlier.failed_evictions),
        }
    }
}

/// Thread-safe tracer that keeps atomic totals.
#[derive(Debug, Default)]
pub struct CountingTracer {
    faults: AtomicU64,
    failed_faults: AtomicU64,
    bytes_read: AtomicU64,
    evictions: AtomicU64,
    failed_evictions: AtomicU64,
    last_free_list_size: AtomicU64,
}

impl CountingTracer {
    /// Creates a tracer with zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Free-list size reported by the most recent fault.
    pub fn last_free_list_size(&self) -> u64 {
        self.last_free_list_size.load(Ordering::Relaxed)
    }

    /// Current totals.
    pub fn totals(&self) -> TracerSnapshot {
        TracerSnapshot {
            faults: self.faults.load(Ordering::Relaxed),
            failed_faults: self.failed_faults.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            failed_evictions: self.failed_evictions.load(Ordering::Relaxed),
        }
    }
}

impl PageCacheTracer for CountingTracer {
    fn fault_closed(&self, fault: &FaultRecord) {
        self.faults.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(fault.bytes_read, Ordering::Relaxed);
        if fault.failure.is_some() {
            self.failed_faults.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(size) = fault.free_list_size {
            self.last_free_list_size
                .store(size as u64, Ordering::Relaxed);
        }
    }

    fn eviction_closed(&self, eviction: &EvictionRecord) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
        if eviction.failure.is_some() {
            self.failed_evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn snapshot(&self) -> Option<TracerSnapshot> {
        Some(self.totals())
    }
}

/// Event describing a single page-cache miss.
pub struct PageFaultEvent<'t> {
    tracer: &'t dyn PageCacheTracer,
    record: FaultRecord,
    closed: bool,
}

impl<'t> PageFaultEvent<'t> {
    /// Opens a fault for `file_page_id`.
    pub fn begin(tracer: &'t dyn PageCacheTracer, file_page_id: PageId) -> Self {
        Self {
            tracer,
            record: FaultRecord {
                file_page_id,
                ..FaultRecord::default()
            },
            closed: false,
        }
    }

    /// Accumulates bytes read from the backing file.
    pub fn add_bytes_read(&mut self, bytes: u64) {
        self.record.bytes_read = self.record.bytes_read.saturating_add(bytes);
    }

    /// Records the frame used to satisfy the fault. Informational only.
    pub fn set_cache_page_id(&mut self, cache_page_id: u64) {
        self.record.cache_page_id = Some(cache_page_id);
    }

    /// Records the number of free frames when the fault started.
    pub fn set_free_list_size(&mut self, free_list_size: usize) {
        self.record.free_list_size = Some(free_list_size);
    }

    /// Starts the eviction of `cache_page_id`.
    ///
    /// # Errors
    ///
    /// Returns [`TraceError::EvictionAlreadyBegun`] if this fault already
    /// started an eviction.
    pub fn begin_eviction(&mut self, cache_page_id: u64) -> Result<EvictionEvent<'t>, TraceError> {
        if self.record.evicted {
            return Err(TraceError::EvictionAlreadyBegun);
        }
        self.record.evicted = true;
        Ok(EvictionEvent {
            tracer: self.tracer,
            record: EvictionRecord {
                cache_page_id,
                ..EvictionRecord::default()
            },
            closed: false,
        })
    }

    /// Marks the fault as failed.
    pub fn set_exception(&mut self, err: &dyn std::error::Error) {
        self.record.failure = Some(err.to_string());
    }

    /// Bytes accumulated so far.
    pub fn bytes_read(&self) -> u64 {
        self.record.bytes_read
    }

    /// Whether the fault has been marked as failed.
    pub fn failed(&self) -> bool {
        self.record.failure.is_some()
    }

    /// Finalises the event.
    pub fn close(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        if !self.closed {
            self.closed = true;
            self.tracer.fault_closed(&self.record);
        }
    }
}

impl Drop for PageFaultEvent<'_> {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Event describing the reclamation of an occupied frame.
pub struct EvictionEvent<'t> {
    tracer: &'t dyn PageCacheTracer,
    record: EvictionRecord,
    closed: bool,
}

impl EvictionEvent<'_> {
    /// Records the file page that occupied the frame.
    pub fn set_file_page_id(&mut self, file_page_id: PageId) {
        self.record.file_page_id = Some(file_page_id);
    }

    /// Records the frame being reclaimed.
    pub fn set_cache_page_id(&mut self, cache_page_id: u64) {
        self.record.cache_page_id = cache_page_id;
    }

    /// Marks the eviction as failed.
    pub fn set_exception(&mut self, err: &dyn std::error::Error) {
        self.record.failure = Some(err.to_string());
    }

    /// Finalises the event.
    pub fn close(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        if !self.closed {
            self.closed = true;
            self.tracer.eviction_closed(&self.record);
        }
    }
}

impl Drop for EvictionEvent<'_> {
    fn drop(&mut self) {
        self.finish();
    }
}
