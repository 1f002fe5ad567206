//! Property chains of nodes and relationships, and property records no chain
//! references.

use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};

use super::{peek, record_type_of, CheckContext, CANCEL_CHECK_INTERVAL};
use crate::check::error::Result;
use crate::check::limiter::EntityRange;
use crate::check::summary::RecordType;
use crate::storage::{
    existence_constraints, PropertyOwner, PropertyValue, SchemaTarget, StoreAccess,
};
use crate::types::{EntityType, LabelId, NodeId, PropKeyId, PropertyId, RelationshipId, TypeId};

/// Property ids swept per unit of work when looking for orphans.
const ORPHAN_SWEEP_CHUNK: u64 = 4096;

/// Token an entity is matched against schema rules with.
pub(crate) enum EntityToken<'a> {
    Labels(&'a [LabelId]),
    Type(TypeId),
}

impl EntityToken<'_> {
    pub(crate) fn matches(&self, target: &SchemaTarget) -> bool {
        match (self, target.entity_type) {
            (EntityToken::Labels(labels), EntityType::Node) => {
                labels.contains(&LabelId(target.token))
            }
            (EntityToken::Type(rel_type), EntityType::Relationship) => {
                rel_type.0 == target.token
            }
            _ => false,
        }
    }
}

/// Reads the live properties of a chain without reporting anything.
///
/// Stops at the first broken link; the property phase reports those.
pub(crate) fn read_values(
    store: &dyn StoreAccess,
    owner: PropertyOwner,
    first: Option<PropertyId>,
) -> Result<FxHashMap<PropKeyId, PropertyValue>> {
    let high = store.high_ids().properties;
    let mut values = FxHashMap::default();
    let mut visited = FxHashSet::default();
    let mut next = first;
    while let Some(id) = next {
        if id.0 >= high || !visited.insert(id) {
            break;
        }
        let Some(prop) = peek(store.property(id))? else {
            break;
        };
        if !prop.in_use || prop.owner != owner {
            break;
        }
        values.entry(prop.key).or_insert(prop.value);
        next = prop.next;
    }
    Ok(values)
}

pub(crate) fn check_range(ctx: &CheckContext<'_>, range: &EntityRange) -> Result<()> {
    for raw in range.ids() {
        if raw % CANCEL_CHECK_INTERVAL == 0 {
            ctx.check_cancelled()?;
        }
        match range.entity_type {
            EntityType::Node => {
                let Some(node) = peek(ctx.store.node(NodeId(raw)))? else {
                    continue;
                };
                if node.in_use {
                    let owner = PropertyOwner::Node(node.id);
                    let values = walk_chain(ctx, owner, node.first_prop)?;
                    check_existence(ctx, owner, &EntityToken::Labels(&node.labels), &values);
                }
            }
            EntityType::Relationship => {
                let Some(rel) = peek(ctx.store.relationship(RelationshipId(raw)))? else {
                    continue;
                };
                if rel.in_use {
                    let owner = PropertyOwner::Relationship(rel.id);
                    let values = walk_chain(ctx, owner, rel.first_prop)?;
                    check_existence(ctx, owner, &EntityToken::Type(rel.rel_type), &values);
                }
            }
        }
    }
    Ok(())
}

fn owner_record_type(owner: PropertyOwner) -> RecordType {
    match owner {
        PropertyOwner::Node(_) => record_type_of(EntityType::Node),
        PropertyOwner::Relationship(_) => record_type_of(EntityType::Relationship),
    }
}

/// Walks one property chain, marking every record it reaches.
fn walk_chain(
    ctx: &CheckContext<'_>,
    owner: PropertyOwner,
    first: Option<PropertyId>,
) -> Result<FxHashMap<PropKeyId, PropertyValue>> {
    let owner_rt = owner_record_type(owner);
    let owner_id = owner.raw_id();
    let tokens = ctx.store.tokens();
    let mut values = FxHashMap::default();
    let mut visited = FxHashSet::default();
    let mut next = first;
    while let Some(id) = next {
        if id.0 >= ctx.high.properties {
            ctx.report(owner_rt, owner_id, || {
                format!("property chain points at {id}, beyond high id {}", ctx.high.properties)
            });
            break;
        }
        if !visited.insert(id) {
            ctx.report(owner_rt, owner_id, || format!("property chain revisits {id}"));
            break;
        }
        let already_referenced = ctx.state.referenced_properties.set(id.0);
        let prop = match ctx.store.property(id) {
            Ok(prop) => prop,
            Err(err) if err.is_malformed() => {
                if !already_referenced {
                    ctx.report(RecordType::Property, id.0, || err.to_string());
                }
                break;
            }
            Err(err) => return Err(err.into()),
        };
        if !prop.in_use {
            ctx.report(owner_rt, owner_id, || {
                format!("property chain references unused record {id}")
            });
            break;
        }
        if prop.owner != owner {
            ctx.report(RecordType::Property, id.0, || {
                format!("record is owned by {} but reached from {owner}", prop.owner)
            });
            break;
        }
        if !tokens.has_property_key(prop.key) {
            ctx.report(RecordType::Property, id.0, || {
                format!("unknown property key {}", prop.key)
            });
        } else if values.contains_key(&prop.key) {
            ctx.report(owner_rt, owner_id, || {
                format!("property key {} appears twice in the chain", prop.key)
            });
        } else {
            values.insert(prop.key, prop.value);
        }
        next = prop.next;
    }
    Ok(values)
}

fn check_existence(
    ctx: &CheckContext<'_>,
    owner: PropertyOwner,
    token: &EntityToken<'_>,
    values: &FxHashMap<PropKeyId, PropertyValue>,
) {
    for constraint in existence_constraints(ctx.store.schema()) {
        if !token.matches(&constraint.target) {
            continue;
        }
        if let Some(missing) = constraint
            .target
            .properties
            .iter()
            .find(|key| !values.contains_key(key))
        {
            ctx.report(owner_record_type(owner), owner.raw_id(), || {
                format!(
                    "existence constraint {} requires property key {missing}",
                    constraint.id
                )
            });
        }
    }
}

/// Reports in-use property records that no chain reached.
///
/// Must run after every entity range of the property phase.
pub(crate) fn sweep_orphans(ctx: &CheckContext<'_>) -> Result<()> {
    let high = ctx.high.properties;
    let chunks = high.div_ceil(ORPHAN_SWEEP_CHUNK);
    (0..chunks).into_par_iter().try_for_each(|chunk| {
        ctx.check_cancelled()?;
        let low = chunk * ORPHAN_SWEEP_CHUNK;
        for raw in low..(low + ORPHAN_SWEEP_CHUNK).min(high) {
            if ctx.state.referenced_properties.get(raw) {
                continue;
            }
            let Some(prop) = ctx.owned(RecordType::Property, raw, ctx.store.property(PropertyId(raw)))?
            else {
                continue;
            };
            if prop.in_use {
                ctx.report(RecordType::Property, raw, || {
                    format!("in use but not referenced by any chain (owner {})", prop.owner)
                });
            }
        }
        Ok(())
    })
}
