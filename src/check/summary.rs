//! Inconsistency accounting.
//!
//! Workers record into a shared [`SummaryAccumulator`] through atomic adds;
//! the orchestrator freezes it into a read-only [`ConsistencySummary`] once
//! every phase has finished.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::primitives::pager::{PageCacheStats, TracerSnapshot};

/// Category an inconsistency is accounted under.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordType {
    /// Schema rules and constraints.
    Schema,
    /// Node records.
    Node,
    /// Relationship records.
    Relationship,
    /// Property records.
    Property,
    /// Index entries with no matching record.
    Index,
    /// Stored node and relationship counts.
    Counts,
    /// Stored per-node degrees.
    RelationshipGroup,
}

impl RecordType {
    /// Every record type, in report order.
    pub const ALL: [RecordType; 7] = [
        RecordType::Schema,
        RecordType::Node,
        RecordType::Relationship,
        RecordType::Property,
        RecordType::Index,
        RecordType::Counts,
        RecordType::RelationshipGroup,
    ];

    const fn slot(self) -> usize {
        self as usize
    }

    /// Upper-case name used in displays and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            RecordType::Schema => "SCHEMA",
            RecordType::Node => "NODE",
            RecordType::Relationship => "RELATIONSHIP",
            RecordType::Property => "PROPERTY",
            RecordType::Index => "INDEX",
            RecordType::Counts => "COUNTS",
            RecordType::RelationshipGroup => "RELATIONSHIP_GROUP",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One detected inconsistency.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inconsistency {
    /// Category the inconsistency is counted under.
    pub record_type: RecordType,
    /// Id of the offending record, rule or token.
    pub id: u64,
    /// Human-readable description.
    pub message: String,
}

/// Concurrent accumulator shared by all workers of a run.
pub struct SummaryAccumulator {
    counts: [AtomicU64; 7],
    /// Finding slots claimed so far; never exceeds `max_findings`.
    retained: AtomicUsize,
    findings: Mutex<Vec<Inconsistency>>,
    max_findings: usize,
}

impl SummaryAccumulator {
    /// Keeps the first `max_findings` findings in full.
    pub fn new(max_findings: usize) -> Self {
        Self {
            counts: Default::default(),
            retained: AtomicUsize::new(0),
            findings: Mutex::new(Vec::new()),
            max_findings,
        }
    }

    /// Records one inconsistency. The message is only built, and the
    /// findings list only locked, when a retained slot is still free.
    pub fn report(&self, record_type: RecordType, id: u64, message: impl FnOnce() -> String) {
        let seen = self.counts[record_type.slot()].fetch_add(1, Ordering::Relaxed);
        let claimed = self
            .retained
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.max_findings).then_some(n + 1)
            })
            .is_ok();
        if !claimed {
            debug!(record_type = %record_type, id, seen, "inconsistency");
            return;
        }
        let message = message();
        debug!(record_type = %record_type, id, %message, "inconsistency");
        self.findings.lock().push(Inconsistency {
            record_type,
            id,
            message,
        });
    }

    /// Inconsistencies of `record_type` reported so far.
    pub fn count(&self, record_type: RecordType) -> u64 {
        self.counts[record_type.slot()].load(Ordering::Relaxed)
    }

    /// Inconsistencies reported so far, over every type.
    pub fn total(&self) -> u64 {
        RecordType::ALL.iter().map(|rt| self.count(*rt)).sum()
    }

    /// Stops accounting and returns the frozen counts and findings.
    pub fn freeze(self) -> ConsistencySummary {
        let counts = RecordType::ALL
            .iter()
            .map(|rt| (*rt, self.counts[rt.slot()].load(Ordering::Relaxed)))
            .collect();
        ConsistencySummary {
            counts,
            findings: self.findings.into_inner(),
            ..ConsistencySummary::default()
        }
    }
}

/// Ranges a run processed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RangeStats {
    /// Node ranges processed.
    pub node_ranges: usize,
    /// Relationship ranges processed.
    pub relationship_ranges: usize,
    /// Stride the limiter planned with.
    pub entities_per_range: u64,
}

/// Result of a completed check.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ConsistencySummary {
    counts: BTreeMap<RecordType, u64>,
    /// First inconsistencies recorded, up to the configured limit.
    pub findings: Vec<Inconsistency>,
    /// Fault and eviction activity during the run, when the tracer counts.
    pub cache: Option<TracerSnapshot>,
    /// Page cache counters at the end of the run.
    pub page_cache: PageCacheStats,
    /// Largest amount of range-cache memory held at once.
    pub peak_memory_bytes: u64,
    /// How the id spaces were split.
    pub ranges: RangeStats,
    /// `true` when only caller-selected ranges were checked.
    pub limited: bool,
}

impl ConsistencySummary {
    /// Inconsistencies recorded for `record_type`.
    pub fn count(&self, record_type: RecordType) -> u64 {
        self.counts.get(&record_type).copied().unwrap_or(0)
    }

    /// Inconsistencies over every record type.
    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    /// `true` when no inconsistency was found.
    pub fn is_consistent(&self) -> bool {
        self.total() == 0
    }

    /// Non-zero counts in record type order.
    pub fn non_zero(&self) -> impl Iterator<Item = (RecordType, u64)> + '_ {
        self.counts
            .iter()
            .filter(|(_, count)| **count > 0)
            .map(|(rt, count)| (*rt, *count))
    }

    /// Starts an exact-count assertion chain.
    ///
    /// ```
    /// # use sombra_check::check::{ConsistencySummary, RecordType};
    /// let summary = ConsistencySummary::default();
    /// summary.verify(RecordType::Node, 0).and_thats_all_folks();
    /// ```
    pub fn verify(&self, record_type: RecordType, expected: u64) -> SummaryAssertion<'_> {
        SummaryAssertion {
            summary: self,
            verified: Vec::new(),
        }
        .verify(record_type, expected)
    }

    /// Asserts that nothing at all was found.
    pub fn assert_consistent(&self) {
        SummaryAssertion {
            summary: self,
            verified: Vec::new(),
        }
        .and_thats_all_folks();
    }
}

impl fmt::Display for ConsistencySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_consistent() {
            return write!(f, "consistent");
        }
        write!(f, "{} inconsistencies:", self.total())?;
        for (rt, count) in self.non_zero() {
            write!(f, " {rt}={count}")?;
        }
        Ok(())
    }
}

/// Test helper asserting exact per-type counts.
#[must_use = "finish the chain with and_thats_all_folks()"]
pub struct SummaryAssertion<'a> {
    summary: &'a ConsistencySummary,
    verified: Vec<RecordType>,
}

impl<'a> SummaryAssertion<'a> {
    /// Panics unless `record_type` has exactly `expected` inconsistencies.
    pub fn verify(mut self, record_type: RecordType, expected: u64) -> Self {
        let actual = self.summary.count(record_type);
        assert_eq!(
            actual, expected,
            "expected {expected} {record_type} inconsistencies, found {actual}; summary: {}",
            self.summary
        );
        self.verified.push(record_type);
        self
    }

    /// Panics if any record type not verified so far has a non-zero count.
    pub fn and_thats_all_folks(self) {
        let unexpected: Vec<String> = self
            .summary
            .non_zero()
            .filter(|(rt, _)| !self.verified.contains(rt))
            .map(|(rt, count)| format!("{rt}={count}"))
            .collect();
        assert!(
            unexpected.is_empty(),
            "unexpected inconsistencies: {}; findings: {:?}",
            unexpected.join(", "),
            self.summary.findings
        );
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn concurrent_reports_are_not_lost() {
        let acc = Arc::new(SummaryAccumulator::new(4));
        std::thread::scope(|scope| {
            for _ in 0..8 {
                let acc = Arc::clone(&acc);
                scope.spawn(move || {
                    for id in 0..1000 {
                        acc.report(RecordType::Node, id, || "bad".into());
                    }
                });
            }
        });
        assert_eq!(acc.count(RecordType::Node), 8000);
        let acc = Arc::into_inner(acc).unwrap();
        let summary = acc.freeze();
        assert_eq!(summary.findings.len(), 4);
        summary.verify(RecordType::Node, 8000).and_thats_all_folks();
    }

    #[test]
    fn messages_past_the_cap_are_never_built() {
        let acc = SummaryAccumulator::new(2);
        acc.report(RecordType::Property, 1, || "first".into());
        acc.report(RecordType::Property, 2, || "second".into());
        for id in 3..10 {
            acc.report(RecordType::Property, id, || panic!("message built past the cap"));
        }
        assert_eq!(acc.retained.load(Ordering::Relaxed), 2);
        let summary = acc.freeze();
        let ids: Vec<u64> = summary.findings.iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![1, 2]);
        summary.verify(RecordType::Property, 9).and_thats_all_folks();
    }

    #[test]
    #[should_panic(expected = "unexpected inconsistencies: INDEX=1")]
    fn unverified_types_must_be_zero() {
        let acc = SummaryAccumulator::new(1);
        acc.report(RecordType::Node, 1, || "a".into());
        acc.report(RecordType::Index, 2, || "b".into());
        acc.freeze()
            .verify(RecordType::Node, 1)
            .and_thats_all_folks();
    }

    #[test]
    fn display_lists_non_zero_types() {
        let acc = SummaryAccumulator::new(0);
        acc.report(RecordType::Counts, 0, || unreachable!());
        let summary = acc.freeze();
        assert_eq!(summary.to_string(), "1 inconsistencies: COUNTS=1");
        assert!(summary.findings.is_empty());
    }
}
