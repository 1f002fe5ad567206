#![allow(missing_docs)]

//! The verdict of a check must not depend on how the id spaces are split or
//! how many workers share the ranges.

use std::sync::Arc;

use proptest::prelude::*;
use sombra_check::{
    check::{
        CheckInputs, CheckOptions, ConsistencySummary, FullCheck, MemoryBudget, MemoryLimiter,
        MemoryTracker, RecordType, CACHE_LINE_SIZE_BYTES,
    },
    primitives::pager::null_tracer,
    storage::{indexes, BuiltStore, GraphBuilder, IndexEntry, PropertyValue},
    types::{NodeId, RelationshipId},
};

#[derive(Debug, Clone)]
enum Corruption {
    DeleteNode(u64),
    DropLabels(u64),
    DetachProperties(u64),
    CutSourceChain(u64),
    StaleCount(u64),
    /// Removes one entry from one index.
    DropIndexEntry(usize, usize),
    /// Adds an entry with a key no record carries; ids past the high id
    /// included.
    BogusIndexEntry(usize, u64),
    /// Copies one unique-index key onto another entity of the same index.
    DuplicateUniqueKey(usize, usize),
}

fn arb_corruption() -> impl Strategy<Value = Corruption> {
    prop_oneof![
        (0u64..120).prop_map(Corruption::DeleteNode),
        (0u64..120).prop_map(Corruption::DropLabels),
        (0u64..120).prop_map(Corruption::DetachProperties),
        (0u64..300).prop_map(Corruption::CutSourceChain),
        (0u64..1_000).prop_map(Corruption::StaleCount),
        (0usize..8, 0usize..500).prop_map(|(slot, pick)| Corruption::DropIndexEntry(slot, pick)),
        (0usize..8, 0u64..400).prop_map(|(slot, entity)| Corruption::BogusIndexEntry(slot, entity)),
        (0usize..200, 0usize..200).prop_map(|(from, to)| Corruption::DuplicateUniqueKey(from, to)),
    ]
}

fn corrupted(seed: u64, corruptions: &[Corruption]) -> BuiltStore {
    let mut builder = GraphBuilder::random(seed, 120, 300);
    let mut stale = None;
    for corruption in corruptions {
        match *corruption {
            Corruption::DeleteNode(id) => {
                if let Some(node) = builder.node_mut(NodeId(id)) {
                    node.in_use = false;
                }
            }
            Corruption::DropLabels(id) => {
                if let Some(node) = builder.node_mut(NodeId(id)) {
                    node.labels.clear();
                }
            }
            Corruption::DetachProperties(id) => {
                if let Some(node) = builder.node_mut(NodeId(id)) {
                    node.first_prop = None;
                }
            }
            Corruption::CutSourceChain(id) => {
                if let Some(rel) = builder.relationship_mut(RelationshipId(id)) {
                    rel.src_next = None;
                }
            }
            Corruption::StaleCount(count) => stale = Some(count),
            _ => {}
        }
    }
    let mut built = builder.build().expect("random store builds");
    if let Some(count) = stale {
        built.catalog.counts.set_node_count(None, count);
    }
    for corruption in corruptions {
        corrupt_index(&mut built, corruption);
    }
    built
}

fn corrupt_index(built: &mut BuiltStore, corruption: &Corruption) {
    let slots = built.catalog.indexes.len();
    if slots == 0 {
        return;
    }
    match *corruption {
        Corruption::DropIndexEntry(slot, pick) => {
            let entries = &mut built.catalog.indexes[slot % slots].entries;
            if !entries.is_empty() {
                let at = pick % entries.len();
                entries.remove(at);
            }
        }
        Corruption::BogusIndexEntry(slot, entity) => {
            built.catalog.indexes[slot % slots].entries.push(IndexEntry {
                entity,
                key: vec![PropertyValue::Int(-1)],
            });
        }
        Corruption::DuplicateUniqueKey(from, to) => {
            let Some(unique) = indexes(&built.catalog.schema)
                .find(|descriptor| descriptor.unique)
                .map(|descriptor| descriptor.id)
            else {
                return;
            };
            let Some(entries) = built.index_entries_mut(unique) else {
                return;
            };
            if entries.is_empty() {
                return;
            }
            let key = entries[from % entries.len()].key.clone();
            let entity = entries[to % entries.len()].entity;
            entries.push(IndexEntry { entity, key });
        }
        _ => {}
    }
}

fn run(built: &BuiltStore, entities: u64, threads: usize) -> ConsistencySummary {
    let opened = built
        .open_in_memory(8, null_tracer())
        .expect("in-memory store opens");
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
    .execute(CheckInputs::from_opened(&opened, &memory))
    .expect("check completes")
}

fn counts(summary: &ConsistencySummary) -> Vec<(RecordType, u64)> {
    RecordType::ALL
        .iter()
        .map(|rt| (*rt, summary.count(*rt)))
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn findings_do_not_depend_on_range_split(
        seed in 0u64..1_000,
        corruptions in prop::collection::vec(arb_corruption(), 0..6),
        entities in 1u64..150,
        threads in 1usize..5,
    ) {
        let built = corrupted(seed, &corruptions);
        let baseline = run(&built, u64::MAX / (2 * CACHE_LINE_SIZE_BYTES), 1);
        prop_assert_eq!(baseline.ranges.node_ranges, 1);
        let split = run(&built, entities, threads);
        prop_assert_eq!(counts(&baseline), counts(&split));
        if corruptions.is_empty() {
            prop_assert!(baseline.is_consistent());
        }
    }
}

#[test]
fn uncorrupted_store_is_clean_at_every_split() {
    let built = corrupted(77, &[]);
    for entities in [1, 7, 64, 1_000] {
        run(&built, entities, 3).assert_consistent();
    }
}
