use std::num::NonZeroUsize;

use serde::{Deserialize, Serialize};

use super::limiter::MemoryBudget;

/// Number of detailed inconsistencies retained in a summary by default.
pub const DEFAULT_MAX_FINDINGS: usize = 32;

/// Which parts of the store are checked. The schema is always checked.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsistencyFlags {
    /// Node, relationship and property records.
    pub check_graph: bool,
    /// Index entries against the records they point at.
    pub check_indexes: bool,
    /// Property records that no chain references.
    pub check_property_owners: bool,
    /// Stored counts and group degrees against tallies.
    pub check_counts: bool,
}

impl Default for ConsistencyFlags {
    fn default() -> Self {
        Self {
            check_graph: true,
            check_indexes: true,
            check_property_owners: true,
            check_counts: true,
        }
    }
}

impl ConsistencyFlags {
    /// Skips the index phase.
    pub fn without_indexes(mut self) -> Self {
        self.check_indexes = false;
        self
    }

    /// Skips the counts and degrees comparison.
    pub fn without_counts(mut self) -> Self {
        self.check_counts = false;
        self
    }
}

/// Options controlling a [`FullCheck`](super::FullCheck) run.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckOptions {
    /// Worker threads; `None` uses the available hardware parallelism.
    pub threads: Option<usize>,
    /// Which checks run.
    pub flags: ConsistencyFlags,
    /// Memory the range plan is derived from.
    pub memory: MemoryBudget,
    /// Detailed inconsistencies kept in the summary; counts are always exact.
    pub max_findings: usize,
}

impl Default for CheckOptions {
    fn default() -> Self {
        Self {
            threads: None,
            flags: ConsistencyFlags::default(),
            memory: MemoryBudget::default(),
            max_findings: DEFAULT_MAX_FINDINGS,
        }
    }
}

impl CheckOptions {
    /// The worker count this run will use.
    pub fn worker_threads(&self) -> usize {
        match self.threads {
            Some(n) if n > 0 => n,
            _ => std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1),
        }
    }
}
