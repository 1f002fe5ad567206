//! Schema rules: property indexes and the constraints that own them.

use serde::{Deserialize, Serialize};

use crate::types::{EntityType, IndexId, PropKeyId};

/// Backing structure of an index. Only affects reporting.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    /// Ordered tree index.
    BTree,
    /// Range index.
    Range,
}

/// What a schema rule applies to: a label (nodes) or a relationship type,
/// plus an ordered list of property keys.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SchemaTarget {
    /// Entity type the rule applies to.
    pub entity_type: EntityType,
    /// Label id for nodes, relationship type id for relationships.
    pub token: u32,
    /// Property keys, in key order.
    pub properties: Vec<PropKeyId>,
}

/// A property index.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    /// Rule id.
    pub id: IndexId,
    /// Entities and properties the index covers.
    pub target: SchemaTarget,
    /// Index implementation.
    pub kind: IndexKind,
    /// `true` for an index backing a uniqueness constraint.
    pub unique: bool,
    /// Constraint that owns this index, for unique indexes.
    #[serde(default)]
    pub owner: Option<IndexId>,
}

impl IndexDescriptor {
    /// Entity type the index covers.
    pub fn entity_type(&self) -> EntityType {
        self.target.entity_type
    }
}

/// Kinds of property constraints.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    /// Values are unique; enforced by the owned unique index.
    Uniqueness {
        /// Owned index backing the constraint.
        index: IndexId,
    },
    /// Every entity with the token carries all the properties.
    Existence,
}

/// A constraint rule.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstraintDescriptor {
    /// Rule id.
    pub id: IndexId,
    /// Entities and properties the constraint covers.
    pub target: SchemaTarget,
    /// What the constraint requires.
    pub kind: ConstraintKind,
}

/// One entry of the schema store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "rule")]
pub enum SchemaRule {
    /// An index rule.
    Index(IndexDescriptor),
    /// A constraint rule.
    Constraint(ConstraintDescriptor),
}

impl SchemaRule {
    /// Rule id.
    pub fn id(&self) -> IndexId {
        match self {
            SchemaRule::Index(index) => index.id,
            SchemaRule::Constraint(constraint) => constraint.id,
        }
    }

    /// Entities and properties the constraint covers.
    pub fn target(&self) -> &SchemaTarget {
        match self {
            SchemaRule::Index(index) => &index.target,
            SchemaRule::Constraint(constraint) => &constraint.target,
        }
    }
}

/// Index descriptors among `rules`, in rule order.
pub fn indexes(rules: &[SchemaRule]) -> impl Iterator<Item = &IndexDescriptor> {
    rules.iter().filter_map(|rule| match rule {
        SchemaRule::Index(index) => Some(index),
        SchemaRule::Constraint(_) => None,
    })
}

/// Existence constraints among `rules`.
pub fn existence_constraints(rules: &[SchemaRule]) -> impl Iterator<Item = &ConstraintDescriptor> {
    rules.iter().filter_map(|rule| match rule {
        SchemaRule::Constraint(c) if matches!(c.kind, ConstraintKind::Existence) => Some(c),
        _ => None,
    })
}
