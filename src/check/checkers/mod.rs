//! The checker family, one module per phase.
//!
//! Each checker works on one [`EntityRange`](super::EntityRange) at a time
//! and records into the shared summary. Anything whose evidence can span
//! ranges goes into [`GlobalState`] and is judged after the phase.

use std::sync::atomic::{AtomicBool, Ordering};

use super::error::{CheckError, Result};
use super::options::ConsistencyFlags;
use super::state::GlobalState;
use super::summary::{RecordType, SummaryAccumulator};
use super::MemoryTracker;
use crate::storage::{CountsStore, DegreesStore, HighIds, IndexLookup, StoreAccess};
use crate::types::{EntityType, StoreError};

pub(crate) mod counts;
pub(crate) mod index;
pub(crate) mod node;
pub(crate) mod property;
pub(crate) mod relationship;
pub(crate) mod schema;

/// Phases in execution order.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Schema rules and constraints.
    Schema,
    /// Node records and their chains.
    Node,
    /// Relationship records and chain reachability.
    Relationship,
    /// Property chains and orphaned records.
    Property,
    /// Index entries against records.
    Index,
    /// Stored counts and degrees.
    Counts,
}

impl Phase {
    /// Every phase in execution order.
    pub const ALL: [Phase; 6] = [
        Phase::Schema,
        Phase::Node,
        Phase::Relationship,
        Phase::Property,
        Phase::Index,
        Phase::Counts,
    ];

    /// Lower-case name used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Schema => "schema",
            Phase::Node => "node",
            Phase::Relationship => "relationship",
            Phase::Property => "property",
            Phase::Index => "index",
            Phase::Counts => "counts",
        }
    }

    /// Whether the phase runs under `flags` and scope.
    pub fn enabled(self, flags: &ConsistencyFlags, full: bool) -> bool {
        match self {
            Phase::Schema => true,
            Phase::Node | Phase::Relationship | Phase::Property => flags.check_graph,
            Phase::Index => flags.check_indexes,
            // Counts need every record tallied.
            Phase::Counts => full && flags.check_graph && flags.check_counts,
        }
    }

    /// Entity types whose ranges the phase iterates.
    pub fn entity_types(self) -> &'static [EntityType] {
        match self {
            Phase::Schema | Phase::Counts => &[],
            Phase::Node => &[EntityType::Node],
            Phase::Relationship => &[EntityType::Relationship],
            Phase::Property | Phase::Index => &[EntityType::Node, EntityType::Relationship],
        }
    }
}

/// Everything a checker reads or writes.
pub(crate) struct CheckContext<'a> {
    pub store: &'a dyn StoreAccess,
    pub indexes: &'a dyn IndexLookup,
    pub counts: &'a CountsStore,
    pub degrees: &'a DegreesStore,
    pub state: &'a GlobalState,
    pub summary: &'a SummaryAccumulator,
    pub memory: &'a MemoryTracker,
    /// Raised to stop the run.
    pub cancel: &'a AtomicBool,
    pub flags: ConsistencyFlags,
    pub high: HighIds,
    /// `false` when only caller-selected ranges are processed.
    pub full: bool,
    /// Bytes one entity costs a range cache.
    pub per_entity_footprint: u64,
}

impl CheckContext<'_> {
    /// Fails with [`CheckError::Cancelled`] once the cancel flag is raised.
    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel.load(Ordering::Relaxed) {
            return Err(CheckError::Cancelled);
        }
        Ok(())
    }

    pub fn report(&self, record_type: RecordType, id: u64, message: impl FnOnce() -> String) {
        self.summary.report(record_type, id, message);
    }

    /// Reads a record this phase is responsible for. A malformed record is
    /// reported under `record_type` and yields `None`.
    pub fn owned<T>(
        &self,
        record_type: RecordType,
        id: u64,
        read: std::result::Result<T, StoreError>,
    ) -> Result<Option<T>> {
        match read {
            Ok(record) => Ok(Some(record)),
            Err(err) if err.is_malformed() => {
                self.report(record_type, id, || err.to_string());
                Ok(None)
            }
            Err(err) => Err(CheckError::Incomplete(err)),
        }
    }
}

/// Reads a record owned by another phase. Malformed records yield `None`
/// without a report; the owning phase reports them.
pub(crate) fn peek<T>(read: std::result::Result<T, StoreError>) -> Result<Option<T>> {
    match read {
        Ok(record) => Ok(Some(record)),
        Err(err) if err.is_malformed() => Ok(None),
        Err(err) => Err(CheckError::Incomplete(err)),
    }
}

pub(crate) fn record_type_of(entity_type: EntityType) -> RecordType {
    match entity_type {
        EntityType::Node => RecordType::Node,
        EntityType::Relationship => RecordType::Relationship,
    }
}

/// Records are checked for cancellation this often within a range.
pub(crate) const CANCEL_CHECK_INTERVAL: u64 = 256;
