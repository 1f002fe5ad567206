//! Stored counts and group degrees against what the record phases tallied.

use std::collections::BTreeSet;

use super::CheckContext;
use crate::check::summary::RecordType;
use crate::storage::DegreeKey;
use crate::types::{LabelId, TypeId, NO_ID};

fn raw_token(token: Option<u32>) -> u64 {
    token.map_or(NO_ID, u64::from)
}

pub(crate) fn check(ctx: &CheckContext<'_>) {
    let tokens = ctx.store.tokens();
    let tally = &ctx.state.counts;

    let mut labels: BTreeSet<Option<LabelId>> = ctx.counts.node_counts().map(|(k, _)| k).collect();
    labels.insert(None);
    labels.extend((0..tokens.labels.len() as u32).map(|i| Some(LabelId(i))));
    for label in labels {
        let stored = ctx.counts.node_count(label);
        let actual = tally.node_count(label);
        if stored != actual {
            ctx.report(RecordType::Counts, raw_token(label.map(|l| l.0)), || match label {
                Some(label) => format!("node count for label {label} is {stored}, found {actual}"),
                None => format!("node count is {stored}, found {actual}"),
            });
        }
    }

    let mut types: BTreeSet<Option<TypeId>> =
        ctx.counts.relationship_counts().map(|(k, _)| k).collect();
    types.insert(None);
    types.extend((0..tokens.types.len() as u32).map(|i| Some(TypeId(i))));
    for rel_type in types {
        let stored = ctx.counts.relationship_count(rel_type);
        let actual = tally.relationship_count(rel_type);
        if stored != actual {
            ctx.report(RecordType::Counts, raw_token(rel_type.map(|t| t.0)), || match rel_type {
                Some(rel_type) => {
                    format!("relationship count for type {rel_type} is {stored}, found {actual}")
                }
                None => format!("relationship count is {stored}, found {actual}"),
            });
        }
    }

    check_degrees(ctx);
}

fn check_degrees(ctx: &CheckContext<'_>) {
    let tallied = ctx.state.degrees.merged();
    let mut keys: BTreeSet<DegreeKey> = ctx.degrees.iter().map(|(k, _)| *k).collect();
    keys.extend(tallied.keys().copied());
    for key in keys {
        let stored = ctx.degrees.degree(&key);
        let actual = tallied.get(&key).copied().unwrap_or(0);
        if stored != actual {
            ctx.report(RecordType::RelationshipGroup, key.node.0, || {
                format!(
                    "{:?} degree for type {} is {stored}, found {actual}",
                    key.direction, key.rel_type
                )
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::checkers::{node, relationship, testing::Harness};
    use crate::storage::{BuiltStore, GraphBuilder};
    use crate::types::{Direction, EntityType, NodeId};

    fn built() -> BuiltStore {
        let mut builder = GraphBuilder::new().with_dense_threshold(2);
        let person = builder.label("Person");
        builder.label("Unused");
        let knows = builder.rel_type("KNOWS");
        let hub = builder.create_node(&[person]);
        for _ in 0..3 {
            let leaf = builder.create_node(&[person]);
            builder.create_relationship(hub, leaf, knows);
        }
        builder.build().unwrap()
    }

    fn run(harness: &Harness) {
        let ctx = harness.ctx();
        node::check_range(&ctx, &harness.whole(EntityType::Node)).unwrap();
        relationship::check_range(&ctx, &harness.whole(EntityType::Relationship)).unwrap();
        check(&ctx);
    }

    #[test]
    fn derived_counts_match() {
        let harness = Harness::new(&built());
        run(&harness);
        harness.finish().assert_consistent();
    }

    #[test]
    fn stale_counts_and_degrees() {
        let mut built = built();
        built.catalog.counts.set_node_count(Some(LabelId(1)), 2);
        built.catalog.counts.set_relationship_count(None, 7);
        let outgoing = DegreeKey {
            node: NodeId(0),
            rel_type: TypeId(0),
            direction: Direction::Outgoing,
        };
        built.catalog.degrees.set_degree(outgoing, 2);
        built.catalog.degrees.set_degree(
            DegreeKey {
                direction: Direction::Incoming,
                ..outgoing
            },
            1,
        );
        let harness = Harness::new(&built);
        run(&harness);
        let summary = harness.finish();
        summary
            .verify(RecordType::Counts, 2)
            .verify(RecordType::RelationshipGroup, 2)
            .and_thats_all_folks();
        assert!(summary
            .findings
            .iter()
            .any(|f| f.record_type == RecordType::Counts && f.id == NO_ID));
    }
}
