//! Store collaborators the consistency checker reads through.
//!
//! Fixed-size record codecs, the read-only [`StoreAccess`] view with its
//! paged implementation, tokens, schema rules, index accessors and the
//! precomputed counts stores. [`GraphBuilder`] lays out stores for tests and
//! the demo command; [`Catalog`] persists the non-record state beside a store.

mod builder;
mod catalog;
mod counts;
mod index;
mod record;
mod schema;
mod store;
mod tokens;

pub use builder::{BuiltStore, GraphBuilder, DEFAULT_DENSE_THRESHOLD};
pub use catalog::{Catalog, IndexContents, OpenedStore};
pub use counts::{CountsStore, DegreeKey, DegreesStore};
pub use index::{IndexAccessor, IndexEntry, IndexKey, IndexLookup, MemoryIndex, MemoryIndexLookup};
pub use record::{
    NodeRecord, PropertyOwner, PropertyRecord, PropertyValue, RelationshipRecord, MAX_LABELS,
    MAX_STR_LEN, NODE_RECORD_SIZE, PROPERTY_RECORD_SIZE, RELATIONSHIP_RECORD_SIZE,
};
pub use schema::{
    existence_constraints, indexes, ConstraintDescriptor, ConstraintKind, IndexDescriptor,
    IndexKind, SchemaRule, SchemaTarget,
};
pub use store::{HighIds, PagedStore, Section, StoreAccess, StoreLayout};
pub use tokens::{TokenHolder, TokenHolders};
