//! Bounded-memory consistency checking.
//!
//! [`FullCheck`] splits the node and relationship id spaces into ranges sized
//! by a [`MemoryLimiter`], runs the checker phases over them on a worker pool
//! and collects every inconsistency into a [`ConsistencySummary`].

mod checkers;
mod error;
mod full_check;
mod limiter;
mod memory;
mod options;
mod progress;
mod state;
mod summary;

pub use checkers::Phase;
pub use error::{CheckError, Result};
pub use full_check::{CheckInputs, CheckScope, FullCheck};
pub use limiter::{
    budget_factory, coalesce, compute_ranges, EntityRange, MemoryBudget, MemoryLimiter,
    MemoryLimiterFactory, CACHE_LINE_SIZE_BYTES, DEFAULT_TOTAL_MEMORY,
};
pub use memory::{MemoryReservation, MemoryTracker};
pub use options::{CheckOptions, ConsistencyFlags, DEFAULT_MAX_FINDINGS};
pub use progress::{no_progress, CountingProgress, NoProgress, ProgressListener};
pub use summary::{
    ConsistencySummary, Inconsistency, RangeStats, RecordType, SummaryAccumulator,
    SummaryAssertion,
};
