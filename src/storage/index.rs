//! Index accessors consumed by the checker and an in-memory implementation.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use super::record::PropertyValue;
use super::schema::IndexDescriptor;
use crate::types::{IndexId, Result, StoreError};

/// Ordered property values an entity is indexed under.
pub type IndexKey = Vec<PropertyValue>;

/// One index entry.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Raw node or relationship id.
    pub entity: u64,
    /// Key the entity is indexed under.
    pub key: IndexKey,
}

/// Read access to a single index.
pub trait IndexAccessor: Send + Sync {
    /// Rule the index implements.
    fn descriptor(&self) -> &IndexDescriptor;

    /// Entries whose entity id lies in `[low, high)`, ordered by entity id.
    fn entries_in(&self, low: u64, high: u64) -> Result<Vec<IndexEntry>>;

    /// Entries whose entity id is `low` or above, `u64::MAX` included.
    fn entries_from(&self, low: u64) -> Result<Vec<IndexEntry>>;

    /// Total number of entries.
    fn len(&self) -> Result<u64>;

    /// `true` when the length is zero.
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// Resolves schema descriptors to index accessors.
pub trait IndexLookup: Send + Sync {
    /// # Errors
    ///
    /// [`StoreError::NotFound`] when no index backs `descriptor`.
    fn accessor(&self, descriptor: &IndexDescriptor) -> Result<Arc<dyn IndexAccessor>>;
}

/// Index held in a sorted set.
pub struct MemoryIndex {
    descriptor: IndexDescriptor,
    entries: RwLock<BTreeSet<IndexEntry>>,
}

impl MemoryIndex {
    /// An empty index for `descriptor`.
    pub fn new(descriptor: IndexDescriptor) -> Self {
        Self {
            descriptor,
            entries: RwLock::new(BTreeSet::new()),
        }
    }

    /// Adds an entry, returning `false` when it was already present.
    pub fn insert(&self, entity: u64, key: IndexKey) -> bool {
        self.entries.write().insert(IndexEntry { entity, key })
    }

    /// Removes an entry, returning whether it was present.
    pub fn remove(&self, entity: u64, key: &IndexKey) -> bool {
        self.entries.write().remove(&IndexEntry {
            entity,
            key: key.clone(),
        })
    }

    /// Removes every entry of `entity`, returning how many were dropped.
    pub fn remove_entity(&self, entity: u64) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|entry| entry.entity != entity);
        before - entries.len()
    }

    /// Every entry ordered by entity id.
    pub fn entries(&self) -> Vec<IndexEntry> {
        self.entries.read().iter().cloned().collect()
    }
}

impl IndexAccessor for MemoryIndex {
    fn descriptor(&self) -> &IndexDescriptor {
        &self.descriptor
    }

    fn entries_in(&self, low: u64, high: u64) -> Result<Vec<IndexEntry>> {
        if low >= high {
            return Ok(Vec::new());
        }
        let start = IndexEntry {
            entity: low,
            key: Vec::new(),
        };
        Ok(self
            .entries
            .read()
            .range(start..)
            .take_while(|entry| entry.entity < high)
            .cloned()
            .collect())
    }

    fn entries_from(&self, low: u64) -> Result<Vec<IndexEntry>> {
        let start = IndexEntry {
            entity: low,
            key: Vec::new(),
        };
        Ok(self.entries.read().range(start..).cloned().collect())
    }

    fn len(&self) -> Result<u64> {
        Ok(self.entries.read().len() as u64)
    }
}

/// [`IndexLookup`] over [`MemoryIndex`]es keyed by index id.
#[derive(Default, Clone)]
pub struct MemoryIndexLookup {
    indexes: FxHashMap<IndexId, Arc<MemoryIndex>>,
}

impl MemoryIndexLookup {
    /// An empty lookup.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `index` under its descriptor's id.
    pub fn register(&mut self, index: MemoryIndex) -> Arc<MemoryIndex> {
        let index = Arc::new(index);
        self.indexes
            .insert(index.descriptor().id, Arc::clone(&index));
        index
    }

    /// Index registered under `id`.
    pub fn get(&self, id: IndexId) -> Option<&Arc<MemoryIndex>> {
        self.indexes.get(&id)
    }

    /// Every registered index, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<MemoryIndex>> {
        self.indexes.values()
    }
}

impl IndexLookup for MemoryIndexLookup {
    fn accessor(&self, descriptor: &IndexDescriptor) -> Result<Arc<dyn IndexAccessor>> {
        let index = self.indexes.get(&descriptor.id).ok_or(StoreError::NotFound)?;
        Ok(Arc::clone(index) as Arc<dyn IndexAccessor>)
    }
}
