//! Index entries against the records they point at.
//!
//! Each range loads the entities it covers once into a range cache and then
//! compares every index of that entity type against it. Unique-index keys
//! are collected across ranges and judged in [`finish`].

use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;
use tracing::debug;

use super::property::{read_values, EntityToken};
use super::{peek, record_type_of, CheckContext, CANCEL_CHECK_INTERVAL};
use crate::check::error::Result;
use crate::check::limiter::EntityRange;
use crate::check::summary::RecordType;
use crate::storage::{
    indexes, IndexAccessor, IndexDescriptor, IndexKey, PropertyOwner, PropertyValue, MAX_LABELS,
};
use crate::types::{EntityType, IndexId, LabelId, NodeId, PropKeyId, RelationshipId, TypeId};

/// An index rule with its opened accessor.
pub(crate) struct IndexHandle {
    pub descriptor: IndexDescriptor,
    pub accessor: Arc<dyn IndexAccessor>,
}

/// Opens an accessor for every index rule. A rule id seen twice is opened
/// once; the schema phase reports the duplicate.
///
/// # Errors
///
/// Fails when an index cannot be opened.
pub(crate) fn open_handles(ctx: &CheckContext<'_>) -> Result<Vec<IndexHandle>> {
    let mut seen: FxHashSet<IndexId> = FxHashSet::default();
    let mut handles = Vec::new();
    for descriptor in indexes(ctx.store.schema()) {
        if !seen.insert(descriptor.id) {
            continue;
        }
        let accessor = ctx.indexes.accessor(descriptor)?;
        handles.push(IndexHandle {
            descriptor: descriptor.clone(),
            accessor,
        });
    }
    Ok(handles)
}

/// What the range cache keeps per live entity.
struct EntityView {
    labels: SmallVec<[LabelId; MAX_LABELS]>,
    rel_type: Option<TypeId>,
    values: FxHashMap<PropKeyId, PropertyValue>,
}

impl EntityView {
    fn token(&self) -> EntityToken<'_> {
        match self.rel_type {
            Some(rel_type) => EntityToken::Type(rel_type),
            None => EntityToken::Labels(&self.labels),
        }
    }

    /// Key the entity must be indexed under, if the index covers it.
    fn expected_key(&self, descriptor: &IndexDescriptor) -> Option<IndexKey> {
        if !self.token().matches(&descriptor.target) {
            return None;
        }
        descriptor
            .target
            .properties
            .iter()
            .map(|key| self.values.get(key).cloned())
            .collect()
    }
}

fn load_views(ctx: &CheckContext<'_>, range: &EntityRange) -> Result<Vec<Option<EntityView>>> {
    let mut views = Vec::with_capacity(range.len() as usize);
    for raw in range.ids() {
        if raw % CANCEL_CHECK_INTERVAL == 0 {
            ctx.check_cancelled()?;
        }
        let view = match range.entity_type {
            EntityType::Node => match peek(ctx.store.node(NodeId(raw)))? {
                Some(node) if node.in_use => Some(EntityView {
                    values: read_values(ctx.store, PropertyOwner::Node(node.id), node.first_prop)?,
                    labels: node.labels,
                    rel_type: None,
                }),
                _ => None,
            },
            EntityType::Relationship => {
                match peek(ctx.store.relationship(RelationshipId(raw)))? {
                    Some(rel) if rel.in_use => Some(EntityView {
                        values: read_values(
                            ctx.store,
                            PropertyOwner::Relationship(rel.id),
                            rel.first_prop,
                        )?,
                        labels: SmallVec::new(),
                        rel_type: Some(rel.rel_type),
                    }),
                    _ => None,
                }
            }
        };
        views.push(view);
    }
    Ok(views)
}

pub(crate) fn check_range(
    ctx: &CheckContext<'_>,
    handles: &[IndexHandle],
    range: &EntityRange,
) -> Result<()> {
    let handles: Vec<&IndexHandle> = handles
        .iter()
        .filter(|h| h.descriptor.entity_type() == range.entity_type)
        .collect();
    if handles.is_empty() {
        return Ok(());
    }
    let _cache = ctx
        .memory
        .reserve(range.len().saturating_mul(ctx.per_entity_footprint));
    let views = load_views(ctx, range)?;
    let entity_rt = record_type_of(range.entity_type);

    for handle in handles {
        ctx.check_cancelled()?;
        let descriptor = &handle.descriptor;
        let index_id = descriptor.id;
        let entries = handle.accessor.entries_in(range.low, range.high)?;
        let mut indexed: FxHashSet<u64> = FxHashSet::default();
        for entry in &entries {
            let view = views
                .get((entry.entity - range.low) as usize)
                .and_then(Option::as_ref);
            let matched = view
                .and_then(|v| v.expected_key(descriptor))
                .is_some_and(|key| key == entry.key);
            if view.is_none() {
                ctx.report(RecordType::Index, entry.entity, || {
                    format!(
                        "index {index_id} has an entry for {} {} which is not in use",
                        range.entity_type, entry.entity
                    )
                });
            } else if !matched {
                ctx.report(RecordType::Index, entry.entity, || {
                    format!(
                        "index {index_id} entry for {} {} does not match its record",
                        range.entity_type, entry.entity
                    )
                });
            } else {
                indexed.insert(entry.entity);
            }
            if descriptor.unique {
                ctx.state.duplicates.record(
                    ctx.memory,
                    index_id,
                    &entry.key,
                    entry.entity,
                    matched,
                );
            }
        }
        for (entity, view) in range.ids().zip(&views) {
            let Some(view) = view else {
                continue;
            };
            if view.expected_key(descriptor).is_some() && !indexed.contains(&entity) {
                ctx.report(entity_rt, entity, || {
                    format!("missing from index {index_id}")
                });
            }
        }
    }
    Ok(())
}

/// Reports unique-index conflicts and, for full runs, entries beyond the
/// high id. Runs once after every range of the index phase.
pub(crate) fn finish(ctx: &CheckContext<'_>, handles: &[IndexHandle]) -> Result<()> {
    let mut conflicts = 0usize;
    for ((index_id, key), claimants) in ctx.state.duplicates.merged() {
        if !claimants.is_conflict() {
            continue;
        }
        conflicts += 1;
        let Some(handle) = handles.iter().find(|h| h.descriptor.id == index_id) else {
            continue;
        };
        let entity_rt = record_type_of(handle.descriptor.entity_type());
        for entity in claimants.matched() {
            ctx.report(entity_rt, entity, || {
                format!(
                    "shares key {} with another entity in unique index {index_id}",
                    format_key(&key)
                )
            });
        }
    }
    ctx.state.duplicates.release(ctx.memory);
    debug!(conflicts, "unique index keys resolved");

    if ctx.full {
        for handle in handles {
            ctx.check_cancelled()?;
            let entity_type = handle.descriptor.entity_type();
            let high = ctx.high.of(entity_type);
            for entry in handle.accessor.entries_from(high)? {
                ctx.report(RecordType::Index, entry.entity, || {
                    format!(
                        "index {} has an entry for {} {} beyond high id {high}",
                        handle.descriptor.id, entity_type, entry.entity
                    )
                });
            }
        }
    }
    Ok(())
}

fn format_key(key: &IndexKey) -> String {
    let parts: Vec<String> = key.iter().map(ToString::to_string).collect();
    format!("({})", parts.join(", "))
}
