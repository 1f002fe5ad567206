#![allow(missing_docs)]

use std::error::Error;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use sombra_check::{
    check::{
        CheckError, CheckInputs, CheckOptions, ConsistencyFlags, ConsistencySummary, FullCheck,
        MemoryBudget, MemoryLimiter, MemoryTracker, ProgressListener, RecordType,
        CACHE_LINE_SIZE_BYTES,
    },
    primitives::pager::null_tracer,
    storage::{BuiltStore, GraphBuilder, IndexEntry, MemoryIndexLookup, PropertyValue},
    types::{NodeId, StoreError},
};

type TestResult = Result<(), Box<dyn Error>>;

fn run(built: &BuiltStore, options: CheckOptions) -> Result<ConsistencySummary, CheckError> {
    let opened = built
        .open_in_memory(64, null_tracer())
        .map_err(CheckError::Incomplete)?;
    let memory = MemoryTracker::new();
    FullCheck::new(options).execute(CheckInputs::from_opened(&opened, &memory))
}

fn threads(n: usize) -> CheckOptions {
    CheckOptions {
        threads: Some(n),
        ..CheckOptions::default()
    }
}

/// a -> b -> c, with names on a and b.
fn path() -> GraphBuilder {
    let mut builder = GraphBuilder::new();
    let person = builder.label("Person");
    let knows = builder.rel_type("KNOWS");
    let name = builder.property_key("name");
    let a = builder.create_node(&[person]);
    let b = builder.create_node(&[person]);
    let c = builder.create_node(&[person]);
    builder.create_relationship(a, b, knows);
    builder.create_relationship(b, c, knows);
    builder.set_node_property(a, name, PropertyValue::Str("ada".into()));
    builder.set_node_property(b, name, PropertyValue::Str("bob".into()));
    builder
}

#[test]
fn generated_store_is_consistent_at_any_parallelism() -> TestResult {
    let built = GraphBuilder::random(11, 500, 1_500).build()?;
    for n in [1, 2, 8] {
        let summary = run(&built, threads(n))?;
        summary.assert_consistent();
        assert!(!summary.limited);
        assert_eq!(summary.ranges.node_ranges, 1);
        assert_eq!(summary.to_string(), "consistent");
    }
    Ok(())
}

#[test]
fn each_corruption_is_counted_under_its_record_type() -> TestResult {
    let mut builder = path();
    // b's only property record loses its owner.
    builder.node_mut(NodeId(1)).ok_or("no node 1")?.first_prop = None;
    // c forgets b -> c.
    builder.node_mut(NodeId(2)).ok_or("no node 2")?.first_rel = None;
    let mut built = builder.build()?;
    built.catalog.counts.set_node_count(None, 99);

    let summary = run(&built, threads(2))?;
    summary
        .verify(RecordType::Property, 1)
        .verify(RecordType::Relationship, 1)
        .verify(RecordType::Counts, 1)
        .and_thats_all_folks();
    assert_eq!(summary.findings.len(), 3);
    assert_eq!(
        summary.to_string(),
        "3 inconsistencies: RELATIONSHIP=1 PROPERTY=1 COUNTS=1"
    );
    Ok(())
}

#[test]
fn findings_are_capped_but_counts_are_exact() -> TestResult {
    let mut built = GraphBuilder::random(5, 300, 600).build()?;
    let index = built.catalog.indexes[0].index;
    let entries = built.index_entries_mut(index).ok_or("no index")?;
    for entity in 1_000..1_050 {
        entries.push(IndexEntry {
            entity,
            key: vec![PropertyValue::Int(entity as i64)],
        });
    }
    let summary = run(
        &built,
        CheckOptions {
            max_findings: 4,
            ..CheckOptions::default()
        },
    )?;
    summary.verify(RecordType::Index, 50).and_thats_all_folks();
    assert_eq!(summary.findings.len(), 4);
    Ok(())
}

#[test]
fn disabled_checks_do_not_report() -> TestResult {
    let mut built = path().build()?;
    built.catalog.counts.set_relationship_count(None, 0);
    let generated = GraphBuilder::random(5, 50, 50).build()?;
    let options = CheckOptions {
        flags: ConsistencyFlags::default().without_counts().without_indexes(),
        ..CheckOptions::default()
    };
    run(&built, options.clone())?.assert_consistent();
    run(&generated, options)?.assert_consistent();
    Ok(())
}

#[test]
fn unopenable_index_aborts_the_run() -> TestResult {
    let built = GraphBuilder::random(5, 50, 50).build()?;
    let opened = built.open_in_memory(16, null_tracer())?;
    let memory = MemoryTracker::new();
    let empty = MemoryIndexLookup::new();
    let inputs = CheckInputs {
        indexes: &empty,
        ..CheckInputs::from_opened(&opened, &memory)
    };
    let err = FullCheck::new(CheckOptions::default())
        .execute(inputs)
        .expect_err("index lookup has no indexes");
    assert!(err.is_incomplete());
    assert!(matches!(err, CheckError::Incomplete(StoreError::NotFound)));
    Ok(())
}

#[test]
fn summary_serialises_for_reports() -> TestResult {
    let mut built = path().build()?;
    built.catalog.counts.set_node_count(None, 1);
    let summary = run(&built, threads(1))?;
    let json = serde_json::to_value(&summary)?;
    assert_eq!(json["findings"][0]["record_type"], "counts");
    assert_eq!(json["limited"], false);
    Ok(())
}

#[test]
fn cancelling_from_another_thread_returns_cancelled() -> TestResult {
    let built = GraphBuilder::random(9, 2_000, 4_000).build()?;
    let opened = built.open_in_memory(4, null_tracer())?;
    let memory = MemoryTracker::new();
    let check = FullCheck::new(threads(2));
    let cancel = check.cancel_handle();
    let progress = Arc::new(CancelAfter {
        cancel,
        after: 3,
        seen: Default::default(),
    });
    // A hundred entities per range.
    let check = check
        .with_progress(progress)
        .with_memory_limiter(Arc::new(|page_cache, high_node, high_rel| {
            MemoryLimiter::new(
                MemoryBudget {
                    total_memory: page_cache + 100 * CACHE_LINE_SIZE_BYTES,
                    page_cache_memory: page_cache,
                    ..MemoryBudget::default()
                },
                high_node,
                high_rel,
            )
        }));
    let err = check
        .execute(CheckInputs::from_opened(&opened, &memory))
        .expect_err("cancelled mid-run");
    assert!(err.is_cancelled());
    assert_eq!(memory.usage(), 0);
    Ok(())
}

/// Raises the cancel flag once `after` progress units were reported.
struct CancelAfter {
    cancel: Arc<AtomicBool>,
    after: u64,
    seen: AtomicU64,
}

impl ProgressListener for CancelAfter {
    fn started(&self, _total: u64) {}

    fn advance(&self, units: u64) {
        if self.seen.fetch_add(units, Ordering::Relaxed) + units >= self.after {
            self.cancel.store(true, Ordering::Relaxed);
        }
    }

    fn finished(&self) {}
}
