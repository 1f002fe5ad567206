#![allow(missing_docs)]

//! Checks run with a memory limit small enough to force several ranges per
//! entity type. Findings must not depend on where the range borders fall.

use std::error::Error;
use std::sync::Arc;

use sombra_check::{
    check::{
        CheckInputs, CheckOptions, CheckScope, ConsistencySummary, EntityRange, FullCheck,
        MemoryBudget, MemoryLimiter, MemoryLimiterFactory, MemoryTracker, RecordType,
        CACHE_LINE_SIZE_BYTES,
    },
    primitives::pager::null_tracer,
    storage::{
        indexes, BuiltStore, GraphBuilder, IndexEntry, IndexKind, PropertyValue, SchemaTarget,
    },
    types::{EntityType, IndexId, PropKeyId},
};

type TestResult = Result<(), Box<dyn Error>>;

/// Limiter whose ranges hold exactly `entities` entities once the page cache
/// is paid for.
fn entities_per_range(entities: u64) -> MemoryLimiterFactory {
    Arc::new(move |page_cache, high_node, high_rel| {
        MemoryLimiter::new(
            MemoryBudget {
                total_memory: page_cache + entities * CACHE_LINE_SIZE_BYTES,
                page_cache_memory: page_cache,
                off_heap_memory: 0,
                per_entity_footprint: CACHE_LINE_SIZE_BYTES,
            },
            high_node,
            high_rel,
        )
    })
}

fn check(
    built: &BuiltStore,
    factory: MemoryLimiterFactory,
    scope: CheckScope,
) -> Result<ConsistencySummary, Box<dyn Error>> {
    let opened = built.open_in_memory(32, null_tracer())?;
    let memory = MemoryTracker::new();
    let summary = FullCheck::new(CheckOptions {
        threads: Some(4),
        ..CheckOptions::default()
    })
    .with_memory_limiter(factory)
    .with_scope(scope)
    .execute(CheckInputs::from_opened(&opened, &memory))?;
    Ok(summary)
}

fn keys(builder: &mut GraphBuilder, count: usize) -> Vec<PropKeyId> {
    (0..count)
        .map(|i| builder.property_key(&format!("key{i}")))
        .collect()
}

/// Twenty labelled nodes under six single-key indexes, two of them unique,
/// plus one unlabelled node at the end of the id space.
fn six_indexes() -> Result<(BuiltStore, u64), Box<dyn Error>> {
    let mut builder = GraphBuilder::new();
    let label = builder.label("label1");
    let keys = keys(&mut builder, 6);
    for (i, key) in keys.iter().enumerate() {
        let target = SchemaTarget {
            entity_type: EntityType::Node,
            token: label.0,
            properties: vec![*key],
        };
        if i < 2 {
            builder.add_unique_constraint(target, IndexKind::Range);
        } else {
            builder.add_index(target, IndexKind::BTree);
        }
    }
    for n in 0..20i64 {
        let node = builder.create_node(&[label]);
        for key in &keys {
            builder.set_node_property(node, *key, n);
        }
    }
    let stranger = builder.create_node(&[]);
    Ok((builder.build()?, stranger.0))
}

#[test]
fn duplicates_in_unique_index_span_ranges() -> TestResult {
    let (mut built, stranger) = six_indexes()?;
    let ids: Vec<IndexId> = built.catalog.indexes.iter().map(|c| c.index).collect();
    for id in ids {
        if let Some(entries) = built.index_entries_mut(id) {
            entries.push(IndexEntry {
                entity: stranger,
                key: vec![PropertyValue::Int(0)],
            });
        }
    }
    let high = built.layout.high.nodes;
    // A third of the node id space per range: node 0 and the stranger never
    // share a range.
    let summary = check(&built, entities_per_range(high / 3), CheckScope::Full)?;
    assert_eq!(summary.ranges.node_ranges, 3);
    summary
        .verify(RecordType::Node, 2)
        .verify(RecordType::Index, 6)
        .and_thats_all_folks();
    assert!(summary
        .findings
        .iter()
        .filter(|f| f.record_type == RecordType::Node)
        .all(|f| f.id == 0));
    Ok(())
}

/// Removes the last node and the last relationship from every index, with
/// `node_count` nodes and `rel_count` relationships spread over ranges of
/// three.
fn missing_entries_in_last_range(node_count: usize, rel_count: usize) -> TestResult {
    let mut builder = GraphBuilder::new();
    let label = builder.label("label3");
    let rel_type = builder.rel_type("C");
    let keys = keys(&mut builder, 4);
    for key in &keys {
        for entity_type in [EntityType::Node, EntityType::Relationship] {
            let token = match entity_type {
                EntityType::Node => label.0,
                EntityType::Relationship => rel_type.0,
            };
            builder.add_index(
                SchemaTarget {
                    entity_type,
                    token,
                    properties: vec![*key],
                },
                IndexKind::Range,
            );
        }
    }
    let nodes: Vec<_> = (0..node_count)
        .map(|n| {
            let node = builder.create_node(&[label]);
            for key in &keys {
                builder.set_node_property(node, *key, n as i64);
            }
            node
        })
        .collect();
    for r in 0..rel_count {
        let src = nodes[r % node_count];
        let dst = nodes[(r + 1) % node_count];
        let rel = builder.create_relationship(src, dst, rel_type);
        for key in &keys {
            builder.set_relationship_property(rel, *key, r as i64);
        }
    }
    let mut built = builder.build()?;
    let last_node = built.layout.high.nodes - 1;
    let last_rel = built.layout.high.relationships - 1;
    let targets: Vec<(IndexId, EntityType)> = indexes(&built.catalog.schema)
        .map(|d| (d.id, d.entity_type()))
        .collect();
    for (id, entity_type) in targets {
        let victim = match entity_type {
            EntityType::Node => last_node,
            EntityType::Relationship => last_rel,
        };
        if let Some(entries) = built.index_entries_mut(id) {
            entries.retain(|e| e.entity != victim);
        }
    }

    let summary = check(&built, entities_per_range(3), CheckScope::Full)?;
    assert_eq!(summary.ranges.node_ranges, node_count.div_ceil(3));
    assert_eq!(summary.ranges.relationship_ranges, rel_count.div_ceil(3));
    assert_ne!(summary.ranges.node_ranges, summary.ranges.relationship_ranges);
    summary
        .verify(RecordType::Node, 4)
        .verify(RecordType::Relationship, 4)
        .and_thats_all_folks();
    Ok(())
}

#[test]
fn missing_entries_found_with_more_node_ranges() -> TestResult {
    missing_entries_in_last_range(10, 4)
}

#[test]
fn missing_entries_found_with_more_relationship_ranges() -> TestResult {
    missing_entries_in_last_range(4, 10)
}

#[test]
fn limited_scope_only_reports_selected_ranges() -> TestResult {
    let (mut built, stranger) = six_indexes()?;
    let ids: Vec<IndexId> = built.catalog.indexes.iter().map(|c| c.index).collect();
    for id in ids {
        if let Some(entries) = built.index_entries_mut(id) {
            entries.push(IndexEntry {
                entity: stranger,
                key: vec![PropertyValue::Int(0)],
            });
        }
    }
    let first_half = EntityRange::new(EntityType::Node, 0, 10).ok_or("empty range")?;
    let summary = check(
        &built,
        entities_per_range(5),
        CheckScope::Limited(vec![first_half]),
    )?;
    assert!(summary.limited);
    // The stranger's range is never visited, so its bogus entries stay hidden.
    summary.assert_consistent();

    let tail = EntityRange::new(EntityType::Node, 15, 1_000).ok_or("empty range")?;
    let summary = check(&built, entities_per_range(5), CheckScope::Limited(vec![tail]))?;
    summary.verify(RecordType::Index, 6).and_thats_all_folks();
    Ok(())
}
