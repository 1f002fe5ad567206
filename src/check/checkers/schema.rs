//! Schema rules against tokens and each other.

use rustc_hash::{FxHashMap, FxHashSet};

use super::CheckContext;
use crate::check::summary::RecordType;
use crate::storage::{
    ConstraintKind, IndexDescriptor, IndexKind, SchemaRule, SchemaTarget, TokenHolders,
};
use crate::types::{EntityType, IndexId, LabelId, TypeId};

fn target_problem(tokens: &TokenHolders, target: &SchemaTarget) -> Option<String> {
    let token_known = match target.entity_type {
        EntityType::Node => tokens.has_label(LabelId(target.token)),
        EntityType::Relationship => tokens.has_type(TypeId(target.token)),
    };
    if !token_known {
        return Some(format!("unknown {} token {}", target.entity_type, target.token));
    }
    if target.properties.is_empty() {
        return Some("rule lists no property keys".into());
    }
    let mut seen = FxHashSet::default();
    for key in &target.properties {
        if !tokens.has_property_key(*key) {
            return Some(format!("unknown property key {key}"));
        }
        if !seen.insert(*key) {
            return Some(format!("property key {key} listed twice"));
        }
    }
    None
}

pub(crate) fn check(ctx: &CheckContext<'_>) {
    let rules = ctx.store.schema();
    let tokens = ctx.store.tokens();
    let mut ids = FxHashSet::default();
    let mut index_schemas: FxHashSet<(&SchemaTarget, IndexKind)> = FxHashSet::default();
    let by_id: FxHashMap<IndexId, &SchemaRule> = rules.iter().map(|r| (r.id(), r)).collect();

    for rule in rules {
        let id = rule.id();
        if !ids.insert(id) {
            ctx.report(RecordType::Schema, id.0, || format!("duplicate schema rule id {id}"));
            continue;
        }
        if let Some(problem) = target_problem(tokens, rule.target()) {
            ctx.report(RecordType::Schema, id.0, || problem);
            continue;
        }
        match rule {
            SchemaRule::Index(index) => {
                if !index_schemas.insert((&index.target, index.kind)) {
                    ctx.report(RecordType::Schema, id.0, || {
                        "index duplicates the schema of an earlier index".into()
                    });
                }
                check_index_owner(ctx, index, &by_id);
            }
            SchemaRule::Constraint(constraint) => {
                if let ConstraintKind::Uniqueness { index } = constraint.kind {
                    let owned = match by_id.get(&index) {
                        Some(SchemaRule::Index(owned)) => Some(owned),
                        _ => None,
                    };
                    let valid = owned.is_some_and(|owned| {
                        owned.unique
                            && owned.owner == Some(constraint.id)
                            && owned.target == constraint.target
                    });
                    if !valid {
                        ctx.report(RecordType::Schema, id.0, || {
                            format!("uniqueness constraint has no matching unique index {index}")
                        });
                    }
                }
            }
        }
    }
}

fn check_index_owner(
    ctx: &CheckContext<'_>,
    index: &IndexDescriptor,
    by_id: &FxHashMap<IndexId, &SchemaRule>,
) {
    if !index.unique {
        return;
    }
    let owned = index.owner.is_some_and(|owner| {
        matches!(
            by_id.get(&owner),
            Some(SchemaRule::Constraint(c))
                if c.kind == (ConstraintKind::Uniqueness { index: index.id })
        )
    });
    if !owned {
        ctx.report(RecordType::Schema, index.id.0, || {
            "unique index is not owned by a uniqueness constraint".into()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::checkers::testing::Harness;
    use crate::storage::{ConstraintDescriptor, GraphBuilder};

    fn target(builder: &mut GraphBuilder) -> SchemaTarget {
        let person = builder.label("Person");
        let name = builder.property_key("name");
        SchemaTarget {
            entity_type: EntityType::Node,
            token: person.0,
            properties: vec![name],
        }
    }

    #[test]
    fn well_formed_schema_is_clean() {
        let mut builder = GraphBuilder::new();
        let t = target(&mut builder);
        builder.add_unique_constraint(t.clone(), IndexKind::Range);
        builder.add_index(t.clone(), IndexKind::BTree);
        builder.add_existence_constraint(t);
        let harness = Harness::new(&builder.build().unwrap());
        check(&harness.ctx());
        harness.finish().assert_consistent();
    }

    #[test]
    fn broken_rules_are_schema_inconsistencies() {
        let mut builder = GraphBuilder::new();
        let t = target(&mut builder);
        let unique = builder.add_unique_constraint(t.clone(), IndexKind::Range);
        // Same schema as an existing index.
        builder.add_index(t.clone(), IndexKind::Range);
        // Unknown label.
        builder.add_index(
            SchemaTarget {
                token: 77,
                ..t.clone()
            },
            IndexKind::BTree,
        );
        // Constraint pointing at a non-unique index.
        let plain = builder.add_index(
            SchemaTarget {
                properties: vec![],
                ..t.clone()
            },
            IndexKind::BTree,
        );
        builder.schema_mut().push(SchemaRule::Constraint(ConstraintDescriptor {
            id: IndexId(100),
            target: t.clone(),
            kind: ConstraintKind::Uniqueness { index: plain },
        }));
        // Orphaned unique index.
        builder.schema_mut().push(SchemaRule::Index(IndexDescriptor {
            id: IndexId(101),
            target: t,
            kind: IndexKind::BTree,
            unique: true,
            owner: None,
        }));
        // Reused id.
        if let Some(SchemaRule::Index(first)) = builder.schema_mut().first().cloned() {
            assert_eq!(first.id, unique);
            builder.schema_mut().push(SchemaRule::Index(first));
        }
        let harness = Harness::new(&builder.build().unwrap());
        check(&harness.ctx());
        // duplicate schema, unknown label, empty keys, bad constraint,
        // orphaned unique index, duplicate id
        harness
            .finish()
            .verify(RecordType::Schema, 6)
            .and_thats_all_folks();
    }
}
