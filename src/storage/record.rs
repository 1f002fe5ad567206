//! Fixed-size record codecs for the node, relationship and property stores.
//!
//! Every record starts with an in-use byte. Pointer fields hold [`NO_ID`]
//! when they do not point anywhere. Records never straddle a page boundary.

use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::primitives::bytes::le;
use crate::types::{
    LabelId, NodeId, PropKeyId, PropertyId, RelationshipId, Result, StoreError, TypeId, NO_ID,
};

/// Encoded size of a node record.
pub const NODE_RECORD_SIZE: usize = 40;
/// Encoded size of a relationship record.
pub const RELATIONSHIP_RECORD_SIZE: usize = 48;
/// Encoded size of a property record.
pub const PROPERTY_RECORD_SIZE: usize = 64;
/// Maximum number of labels stored inline in a node record.
pub const MAX_LABELS: usize = 4;
/// Maximum byte length of an inline string property value.
pub const MAX_STR_LEN: usize = 40;

const IN_USE: u8 = 1;
const NOT_IN_USE: u8 = 0;
const FLAG_DENSE: u8 = 0x01;

const OWNER_NODE: u8 = 0;
const OWNER_RELATIONSHIP: u8 = 1;

const VALUE_INT: u8 = 0;
const VALUE_BOOL: u8 = 1;
const VALUE_STR: u8 = 2;

fn opt_ptr(raw: u64) -> Option<u64> {
    (raw != NO_ID).then_some(raw)
}

fn raw_ptr(ptr: Option<u64>) -> u64 {
    ptr.unwrap_or(NO_ID)
}

fn in_use_flag(kind: &'static str, id: u64, byte: u8) -> Result<bool> {
    match byte {
        IN_USE => Ok(true),
        NOT_IN_USE => Ok(false),
        _ => Err(StoreError::Malformed {
            kind,
            id,
            reason: "bad in-use byte",
        }),
    }
}

fn check_len(kind: &'static str, id: u64, src: &[u8], size: usize) -> Result<()> {
    if src.len() < size {
        return Err(StoreError::Malformed {
            kind,
            id,
            reason: "record truncated",
        });
    }
    Ok(())
}

/// Node record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeRecord {
    /// Record id.
    pub id: NodeId,
    /// `false` for a freed or never-used slot.
    pub in_use: bool,
    /// Dense nodes keep per-type degrees in the group degrees store.
    pub dense: bool,
    /// Inline label ids.
    pub labels: SmallVec<[LabelId; MAX_LABELS]>,
    /// Head of the relationship chain.
    pub first_rel: Option<RelationshipId>,
    /// Head of the property chain.
    pub first_prop: Option<PropertyId>,
}

impl NodeRecord {
    /// An unused node record.
    pub fn unused(id: NodeId) -> Self {
        Self {
            id,
            in_use: false,
            dense: false,
            labels: SmallVec::new(),
            first_rel: None,
            first_prop: None,
        }
    }

    /// `true` when `label` is among the inline labels.
    pub fn has_label(&self, label: LabelId) -> bool {
        self.labels.contains(&label)
    }

    /// Encodes into `dst`, which must hold at least [`NODE_RECORD_SIZE`] bytes.
    pub fn encode(&self, dst: &mut [u8]) -> Result<()> {
        if self.labels.len() > MAX_LABELS {
            return Err(StoreError::Invalid("too many labels for inline node encoding"));
        }
        if dst.len() < NODE_RECORD_SIZE {
            return Err(StoreError::Invalid("node record buffer too small"));
        }
        let dst = &mut dst[..NODE_RECORD_SIZE];
        dst.fill(0);
        dst[0] = if self.in_use { IN_USE } else { NOT_IN_USE };
        dst[1] = if self.dense { FLAG_DENSE } else { 0 };
        dst[2] = self.labels.len() as u8;
        for (i, label) in self.labels.iter().enumerate() {
            le::put_u32(dst, 4 + i * 4, label.0);
        }
        le::put_u64(dst, 20, raw_ptr(self.first_rel.map(|r| r.0)));
        le::put_u64(dst, 28, raw_ptr(self.first_prop.map(|p| p.0)));
        Ok(())
    }

    /// Decodes the node stored in `src`.
    ///
    /// # Errors
    ///
    /// [`StoreError::Malformed`] when the bytes are not a valid node record.
    pub fn decode(id: NodeId, src: &[u8]) -> Result<Self> {
        const KIND: &str = "node";
        check_len(KIND, id.0, src, NODE_RECORD_SIZE)?;
        if !in_use_flag(KIND, id.0, src[0])? {
            return Ok(Self::unused(id));
        }
        if src[1] & !FLAG_DENSE != 0 {
            return Err(StoreError::Malformed {
                kind: KIND,
                id: id.0,
                reason: "unknown node flags",
            });
        }
        let label_count = src[2] as usize;
        if label_count > MAX_LABELS {
            return Err(StoreError::Malformed {
                kind: KIND,
                id: id.0,
                reason: "label count exceeds inline capacity",
            });
        }
        let labels = (0..label_count)
            .map(|i| LabelId(le::get_u32(src, 4 + i * 4)))
            .collect();
        Ok(Self {
            id,
            in_use: true,
            dense: src[1] & FLAG_DENSE != 0,
            labels,
            first_rel: opt_ptr(le::get_u64(src, 20)).map(RelationshipId),
            first_prop: opt_ptr(le::get_u64(src, 28)).map(PropertyId),
        })
    }
}

/// Relationship record.
///
/// Each relationship sits in two chains: its source node's and its target
/// node's. A self-loop is linked once, through the source chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelationshipRecord {
    /// Record id.
    pub id: RelationshipId,
    /// `false` for a freed or never-used slot.
    pub in_use: bool,
    /// Relationship type.
    pub rel_type: TypeId,
    /// Start node.
    pub src: NodeId,
    /// End node.
    pub dst: NodeId,
    /// Next relationship in the start node's chain.
    pub src_next: Option<RelationshipId>,
    /// Next relationship in the end node's chain.
    pub dst_next: Option<RelationshipId>,
    /// Head of the property chain.
    pub first_prop: Option<PropertyId>,
}

impl RelationshipRecord {
    /// A not-in-use record with every pointer empty.
    pub fn unused(id: RelationshipId) -> Self {
        Self {
            id,
            in_use: false,
            rel_type: TypeId(0),
            src: NodeId(NO_ID),
            dst: NodeId(NO_ID),
            src_next: None,
            dst_next: None,
            first_prop: None,
        }
    }

    /// `true` when both ends are the same node.
    pub fn is_loop(&self) -> bool {
        self.src == self.dst
    }

    /// `true` when `node` is either end.
    pub fn involves(&self, node: NodeId) -> bool {
        self.src == node || self.dst == node
    }

    /// The next pointer of `node`'s chain, or `None` if `node` is not an endpoint.
    pub fn next_for(&self, node: NodeId) -> Option<Option<RelationshipId>> {
        if self.src == node {
            Some(self.src_next)
        } else if self.dst == node {
            Some(self.dst_next)
        } else {
            None
        }
    }

    /// Encodes the record into the first bytes of `dst`.
    pub fn encode(&self, dst: &mut [u8]) -> Result<()> {
        if dst.len() < RELATIONSHIP_RECORD_SIZE {
            return Err(StoreError::Invalid("relationship record buffer too small"));
        }
        let dst = &mut dst[..RELATIONSHIP_RECORD_SIZE];
        dst.fill(0);
        dst[0] = if self.in_use { IN_USE } else { NOT_IN_USE };
        le::put_u32(dst, 4, self.rel_type.0);
        le::put_u64(dst, 8, self.src.0);
        le::put_u64(dst, 16, self.dst.0);
        le::put_u64(dst, 24, raw_ptr(self.src_next.map(|r| r.0)));
        le::put_u64(dst, 32, raw_ptr(self.dst_next.map(|r| r.0)));
        le::put_u64(dst, 40, raw_ptr(self.first_prop.map(|p| p.0)));
        Ok(())
    }

    /// Decodes the relationship stored in `src`.
    pub fn decode(id: RelationshipId, src: &[u8]) -> Result<Self> {
        const KIND: &str = "relationship";
        check_len(KIND, id.0, src, RELATIONSHIP_RECORD_SIZE)?;
        if !in_use_flag(KIND, id.0, src[0])? {
            return Ok(Self::unused(id));
        }
        let source = le::get_u64(src, 8);
        let target = le::get_u64(src, 16);
        if source == NO_ID || target == NO_ID {
            return Err(StoreError::Malformed {
                kind: KIND,
                id: id.0,
                reason: "missing endpoint",
            });
        }
        Ok(Self {
            id,
            in_use: true,
            rel_type: TypeId(le::get_u32(src, 4)),
            src: NodeId(source),
            dst: NodeId(target),
            src_next: opt_ptr(le::get_u64(src, 24)).map(RelationshipId),
            dst_next: opt_ptr(le::get_u64(src, 32)).map(RelationshipId),
            first_prop: opt_ptr(le::get_u64(src, 40)).map(PropertyId),
        })
    }
}

/// Entity that owns a property record.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "id")]
pub enum PropertyOwner {
    /// Owned by a node.
    Node(NodeId),
    /// Owned by a relationship.
    Relationship(RelationshipId),
}

impl PropertyOwner {
    /// Owner id without its entity type.
    pub fn raw_id(self) -> u64 {
        match self {
            PropertyOwner::Node(id) => id.0,
            PropertyOwner::Relationship(id) => id.0,
        }
    }
}

impl fmt::Display for PropertyOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyOwner::Node(id) => write!(f, "node {id}"),
            PropertyOwner::Relationship(id) => write!(f, "relationship {id}"),
        }
    }
}

/// Inline property value.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// UTF-8 string of at most [`MAX_STR_LEN`] bytes.
    Str(String),
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Int(v) => write!(f, "{v}"),
            PropertyValue::Bool(v) => write!(f, "{v}"),
            PropertyValue::Str(v) => write!(f, "{v:?}"),
        }
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Int(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Bool(value)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::Str(value.to_owned())
    }
}

/// Property record: one key/value pair in an entity's property chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PropertyRecord {
    /// Record id.
    pub id: PropertyId,
    /// `false` for a freed or never-used slot.
    pub in_use: bool,
    /// Node or relationship whose chain holds the record.
    pub owner: PropertyOwner,
    /// Property key.
    pub key: PropKeyId,
    /// Stored value.
    pub value: PropertyValue,
    /// Next record in the owner's chain.
    pub next: Option<PropertyId>,
}

impl PropertyRecord {
    /// A not-in-use record with an empty chain link.
    pub fn unused(id: PropertyId) -> Self {
        Self {
            id,
            in_use: false,
            owner: PropertyOwner::Node(NodeId(NO_ID)),
            key: PropKeyId(0),
            value: PropertyValue::Bool(false),
            next: None,
        }
    }

    /// Encodes the record into the first bytes of `dst`.
    pub fn encode(&self, dst: &mut [u8]) -> Result<()> {
        if dst.len() < PROPERTY_RECORD_SIZE {
            return Err(StoreError::Invalid("property record buffer too small"));
        }
        let dst = &mut dst[..PROPERTY_RECORD_SIZE];
        dst.fill(0);
        dst[0] = if self.in_use { IN_USE } else { NOT_IN_USE };
        let (owner_kind, owner_id) = match self.owner {
            PropertyOwner::Node(id) => (OWNER_NODE, id.0),
            PropertyOwner::Relationship(id) => (OWNER_RELATIONSHIP, id.0),
        };
        dst[1] = owner_kind;
        le::put_u32(dst, 4, self.key.0);
        le::put_u64(dst, 8, owner_id);
        le::put_u64(dst, 16, raw_ptr(self.next.map(|p| p.0)));
        match &self.value {
            PropertyValue::Int(v) => {
                dst[2] = VALUE_INT;
                le::put_i64(dst, 24, *v);
            }
            PropertyValue::Bool(v) => {
                dst[2] = VALUE_BOOL;
                dst[24] = u8::from(*v);
            }
            PropertyValue::Str(s) => {
                if s.len() > MAX_STR_LEN {
                    return Err(StoreError::Invalid("string property exceeds inline capacity"));
                }
                dst[2] = VALUE_STR;
                dst[3] = s.len() as u8;
                dst[24..24 + s.len()].copy_from_slice(s.as_bytes());
            }
        }
        Ok(())
    }

    /// Decodes the property stored in `src`.
    ///
    /// # Errors
    ///
    /// [`StoreError::Malformed`] for an unknown owner kind, value tag or string length.
    pub fn decode(id: PropertyId, src: &[u8]) -> Result<Self> {
        const KIND: &str = "property";
        let malformed = |reason| StoreError::Malformed {
            kind: KIND,
            id: id.0,
            reason,
        };
        check_len(KIND, id.0, src, PROPERTY_RECORD_SIZE)?;
        if !in_use_flag(KIND, id.0, src[0])? {
            return Ok(Self::unused(id));
        }
        let owner_id = le::get_u64(src, 8);
        let owner = match src[1] {
            OWNER_NODE => PropertyOwner::Node(NodeId(owner_id)),
            OWNER_RELATIONSHIP => PropertyOwner::Relationship(RelationshipId(owner_id)),
            _ => return Err(malformed("unknown owner kind")),
        };
        let value = match src[2] {
            VALUE_INT => PropertyValue::Int(le::get_i64(src, 24)),
            VALUE_BOOL => match src[24] {
                0 => PropertyValue::Bool(false),
                1 => PropertyValue::Bool(true),
                _ => return Err(malformed("bad boolean value")),
            },
            VALUE_STR => {
                let len = src[3] as usize;
                if len > MAX_STR_LEN {
                    return Err(malformed("string length exceeds inline capacity"));
                }
                let s = std::str::from_utf8(&src[24..24 + len])
                    .map_err(|_| malformed("string value is not utf-8"))?;
                PropertyValue::Str(s.to_owned())
            }
            _ => return Err(malformed("unknown value tag")),
        };
        Ok(Self {
            id,
            in_use: true,
            owner,
            key: PropKeyId(le::get_u32(src, 4)),
            value,
            next: opt_ptr(le::get_u64(src, 16)).map(PropertyId),
        })
    }
}
