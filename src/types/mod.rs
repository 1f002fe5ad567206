#![forbid(unsafe_code)]

//! Identifier newtypes and the error type shared by the store collaborators.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Sentinel stored in record pointer fields that do not point anywhere.
pub const NO_ID: u64 = u64::MAX;

macro_rules! record_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize,
        )]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                $name(value)
            }
        }
    };
}

macro_rules! token_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
        pub struct $name(pub u32);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u32> for $name {
            fn from(value: u32) -> Self {
                $name(value)
            }
        }
    };
}

record_id!(
    /// Identifier of a node record.
    NodeId
);
record_id!(
    /// Identifier of a relationship record.
    RelationshipId
);
record_id!(
    /// Identifier of a property record.
    PropertyId
);
record_id!(
    /// Identifier of a page in a store file.
    PageId
);
token_id!(
    /// Label token.
    LabelId
);
token_id!(
    /// Relationship type token.
    TypeId
);
token_id!(
    /// Property key token.
    PropKeyId
);
record_id!(
    /// Identifier of a schema rule (index or constraint).
    IndexId
);

/// Kind of entity an id space belongs to.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    /// Node id space.
    Node,
    /// Relationship id space.
    Relationship,
}

impl EntityType {
    /// Both entity types in processing order.
    pub const ALL: [EntityType; 2] = [EntityType::Node, EntityType::Relationship];

    /// Lower-case name used in logs and on the command line.
    pub fn as_str(self) -> &'static str {
        match self {
            EntityType::Node => "node",
            EntityType::Relationship => "relationship",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of a relationship as seen from one of its nodes.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// The node is the source.
    Outgoing,
    /// The node is the target.
    Incoming,
    /// The node is both source and target.
    Loop,
}

impl Direction {
    /// All directions.
    pub const ALL: [Direction; 3] = [Direction::Outgoing, Direction::Incoming, Direction::Loop];
}

/// Errors raised by store collaborators (page cache, record stores, indexes).
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// Underlying I/O failure.
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    /// Structural corruption that prevents the store from being opened or read.
    #[error("corruption: {0}")]
    Corruption(&'static str),
    /// A record was read successfully but its bytes do not decode.
    #[error("malformed {kind} record {id}: {reason}")]
    Malformed {
        /// Record kind name.
        kind: &'static str,
        /// Record id.
        id: u64,
        /// Decoder complaint.
        reason: &'static str,
    },
    /// Invalid argument passed to a collaborator.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// Requested object does not exist.
    #[error("not found")]
    NotFound,
}

impl StoreError {
    /// Returns `true` when the record was found but is internally wrong.
    ///
    /// Such errors are logical inconsistencies; every other variant means the
    /// ground truth could not be determined.
    pub fn is_malformed(&self) -> bool {
        matches!(self, StoreError::Malformed { .. })
    }
}

/// Result alias for store collaborators.
pub type Result<T> = std::result::Result<T, StoreError>;
