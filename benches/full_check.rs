#![forbid(unsafe_code)]

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use sombra_check::check::{
    CheckInputs, CheckOptions, FullCheck, MemoryBudget, MemoryLimiter, MemoryTracker,
    CACHE_LINE_SIZE_BYTES,
};
use sombra_check::primitives::pager::null_tracer;
use sombra_check::storage::{GraphBuilder, OpenedStore};

const NODE_COUNT: usize = 20_000;
const REL_COUNT: usize = 60_000;

fn full_check(c: &mut Criterion) {
    let built = GraphBuilder::random(1, NODE_COUNT, REL_COUNT)
        .build()
        .expect("build store");
    let opened = built
        .open_in_memory(256, null_tracer())
        .expect("open store");

    let mut group = c.benchmark_group("check/full");
    group.sample_size(10);
    group.throughput(Throughput::Elements((NODE_COUNT + REL_COUNT) as u64));
    for entities in [u64::MAX / (2 * CACHE_LINE_SIZE_BYTES), 4_096, 512] {
        for threads in [1usize, 4] {
            let label = if entities > NODE_COUNT as u64 {
                format!("single-range/t{threads}")
            } else {
                format!("{entities}-per-range/t{threads}")
            };
            group.bench_with_input(
                BenchmarkId::from_parameter(label),
                &(entities, threads),
                |b, &(entities, threads)| {
                    b.iter(|| black_box(run(&opened, entities, threads)));
                },
            );
        }
    }
    group.finish();
}

fn run(opened: &OpenedStore, entities: u64, threads: usize) -> u64 {
    let memory = MemoryTracker::new();
    FullCheck::new(CheckOptions {
        threads: Some(threads),
        ..CheckOptions::default()
    })
    .with_memory_limiter(Arc::new(move |page_cache, high_node, high_rel| {
        MemoryLimiter::new(
            MemoryBudget {
                total_memory: page_cache + entities * CACHE_LINE_SIZE_BYTES,
                page_cache_memory: page_cache,
                ..MemoryBudget::default()
            },
            high_node,
            high_rel,
        )
    }))
    .execute(CheckInputs::from_opened(opened, &memory))
    .map(|summary| summary.total())
    .expect("check completes")
}

criterion_group!(benches, full_check);
criterion_main!(benches);
