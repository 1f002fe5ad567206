#![allow(missing_docs)]

//! Page cache activity seen through the tracer during a check.

use std::error::Error;
use std::sync::Arc;

use sombra_check::{
    check::{CheckError, CheckInputs, CheckOptions, FullCheck, MemoryTracker},
    primitives::{
        io::{FaultyIo, MemIo},
        pager::{CountingTracer, PageCacheTracer},
    },
    storage::GraphBuilder,
    types::StoreError,
};

type TestResult = Result<(), Box<dyn Error>>;

#[test]
fn small_cache_faults_and_evicts() -> TestResult {
    let built = GraphBuilder::random(3, 2_000, 6_000)
        .with_page_size(4096)
        .build()?;
    let total_pages = built.layout.total_pages();
    assert!(total_pages > 8, "store too small: {total_pages} pages");

    let tracer = Arc::new(CountingTracer::new());
    let opened = built.open_in_memory(4, Arc::clone(&tracer) as Arc<dyn PageCacheTracer>)?;
    let memory = MemoryTracker::new();
    let summary = FullCheck::new(CheckOptions {
        threads: Some(2),
        ..CheckOptions::default()
    })
    .execute(CheckInputs::from_opened(&opened, &memory))?;
    summary.assert_consistent();

    let cache = summary.cache.ok_or("counting tracer reports a snapshot")?;
    assert!(cache.faults > 4);
    assert!(cache.evictions > 0);
    assert_eq!(cache.failed_faults, 0);
    assert_eq!(cache.bytes_read, cache.faults * 4096);
    assert_eq!(summary.page_cache.evictions, tracer.totals().evictions);
    Ok(())
}

#[test]
fn generous_cache_reads_each_page_once() -> TestResult {
    let built = GraphBuilder::random(3, 500, 1_000).build()?;
    let pages = built.layout.total_pages() as usize;
    let tracer = Arc::new(CountingTracer::new());
    let opened = built.open_in_memory(pages, Arc::clone(&tracer) as Arc<dyn PageCacheTracer>)?;
    let memory = MemoryTracker::new();
    let summary = FullCheck::new(CheckOptions::default())
        .execute(CheckInputs::from_opened(&opened, &memory))?;

    let totals = tracer.totals();
    assert_eq!(totals.evictions, 0);
    assert!(totals.faults <= pages as u64);
    assert_eq!(summary.cache.map(|c| c.evictions), Some(0));
    Ok(())
}

#[test]
fn unreadable_page_leaves_the_check_incomplete() -> TestResult {
    let built = GraphBuilder::random(4, 300, 900).build()?;
    let page_size = u64::from(built.layout.page_size);
    let last_page = built.layout.total_pages() - 1;
    let faulty = Arc::new(FaultyIo::new(MemIo::new(), page_size));
    let tracer = Arc::new(CountingTracer::new());
    let opened = built.open_on(
        Arc::clone(&faulty) as _,
        2,
        Arc::clone(&tracer) as Arc<dyn PageCacheTracer>,
    )?;
    faulty.fail_region(last_page);

    let memory = MemoryTracker::new();
    let err = FullCheck::new(CheckOptions::default())
        .execute(CheckInputs::from_opened(&opened, &memory))
        .expect_err("a record page cannot be read");
    assert!(err.is_incomplete());
    assert!(matches!(err, CheckError::Incomplete(StoreError::Io(_))));
    assert!(tracer.totals().failed_faults >= 1);

    faulty.heal();
    FullCheck::new(CheckOptions::default())
        .execute(CheckInputs::from_opened(&opened, &memory))?
        .assert_consistent();
    Ok(())
}
