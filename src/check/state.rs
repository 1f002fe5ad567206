//! Cross-range state built while ranges are checked and read back once the
//! phase that fills it has completed.
//!
//! Everything here is written concurrently by workers. Bit sets and counters
//! use atomic read-modify-write operations. Maps are sharded per worker
//! thread and merged after the phase.

use std::collections::hash_map::Entry;
use std::mem::size_of;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use super::memory::MemoryTracker;
use crate::storage::{DegreeKey, HighIds, IndexKey, PropertyValue, TokenHolders};
use crate::types::{IndexId, LabelId, TypeId};

/// Fixed-size bit set with atomic updates.
pub struct AtomicBitSet {
    words: Vec<AtomicU64>,
    len: u64,
}

impl AtomicBitSet {
    pub fn new(len: u64) -> Self {
        let words = (0..len.div_ceil(64)).map(|_| AtomicU64::new(0)).collect();
        Self { words, len }
    }

    /// Sets bit `index`, returning whether it was already set.
    /// Indexes beyond the set are ignored and report `false`.
    pub fn set(&self, index: u64) -> bool {
        if index >= self.len {
            return false;
        }
        let mask = 1u64 << (index % 64);
        let prev = self.words[(index / 64) as usize].fetch_or(mask, Ordering::AcqRel);
        prev & mask != 0
    }

    pub fn get(&self, index: u64) -> bool {
        if index >= self.len {
            return false;
        }
        let mask = 1u64 << (index % 64);
        self.words[(index / 64) as usize].load(Ordering::Acquire) & mask != 0
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn heap_bytes(&self) -> u64 {
        (self.words.len() * std::mem::size_of::<AtomicU64>()) as u64
    }
}

/// Node and relationship counts tallied from the records.
pub struct CountsTally {
    nodes: AtomicU64,
    nodes_by_label: Vec<AtomicU64>,
    relationships: AtomicU64,
    relationships_by_type: Vec<AtomicU64>,
}

impl CountsTally {
    fn new(tokens: &TokenHolders) -> Self {
        let zeros = |n: usize| (0..n).map(|_| AtomicU64::new(0)).collect();
        Self {
            nodes: AtomicU64::new(0),
            nodes_by_label: zeros(tokens.labels.len()),
            relationships: AtomicU64::new(0),
            relationships_by_type: zeros(tokens.types.len()),
        }
    }

    /// Counts a live node once, and once per distinct known label.
    pub fn add_node(&self, labels: &[LabelId]) {
        self.nodes.fetch_add(1, Ordering::Relaxed);
        for (i, label) in labels.iter().enumerate() {
            if labels[..i].contains(label) {
                continue;
            }
            if let Some(slot) = self.nodes_by_label.get(label.0 as usize) {
                slot.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn add_relationship(&self, rel_type: TypeId) {
        self.relationships.fetch_add(1, Ordering::Relaxed);
        if let Some(slot) = self.relationships_by_type.get(rel_type.0 as usize) {
            slot.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn node_count(&self, label: Option<LabelId>) -> u64 {
        match label {
            None => self.nodes.load(Ordering::Relaxed),
            Some(label) => self
                .nodes_by_label
                .get(label.0 as usize)
                .map_or(0, |slot| slot.load(Ordering::Relaxed)),
        }
    }

    pub fn relationship_count(&self, rel_type: Option<TypeId>) -> u64 {
        match rel_type {
            None => self.relationships.load(Ordering::Relaxed),
            Some(rel_type) => self
                .relationships_by_type
                .get(rel_type.0 as usize)
                .map_or(0, |slot| slot.load(Ordering::Relaxed)),
        }
    }
}

fn worker_shard(shards: usize) -> usize {
    rayon::current_thread_index().map_or(0, |i| (i + 1) % shards)
}

/// Group degrees of dense nodes, one shard per worker.
pub struct DegreeTally {
    shards: Vec<Mutex<FxHashMap<DegreeKey, u64>>>,
}

impl DegreeTally {
    fn new(shards: usize) -> Self {
        Self {
            shards: (0..shards.max(1)).map(|_| Mutex::default()).collect(),
        }
    }

    pub fn add(&self, key: DegreeKey) {
        let shard = worker_shard(self.shards.len());
        *self.shards[shard].lock().entry(key).or_default() += 1;
    }

    pub fn merged(&self) -> FxHashMap<DegreeKey, u64> {
        let mut merged = FxHashMap::default();
        for shard in &self.shards {
            for (key, degree) in shard.lock().drain() {
                *merged.entry(key).or_default() += degree;
            }
        }
        merged
    }
}

/// Entities found under one key of a unique index.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Claimants {
    /// `(entity, matched)`; `matched` is set when the entity's record
    /// actually carries the key.
    pub entities: SmallVec<[(u64, bool); 2]>,
}

impl Claimants {
    /// Returns whether `entity` is a new claimant.
    fn add(&mut self, entity: u64, matched: bool) -> bool {
        match self.entities.iter_mut().find(|(e, _)| *e == entity) {
            Some((_, m)) => {
                *m |= matched;
                false
            }
            None => {
                self.entities.push((entity, matched));
                true
            }
        }
    }

    pub fn is_conflict(&self) -> bool {
        self.entities.len() > 1
    }

    pub fn matched(&self) -> impl Iterator<Item = u64> + '_ {
        self.entities.iter().filter(|(_, m)| *m).map(|(e, _)| *e)
    }
}

/// Bytes one more claimant adds to a known key.
const CLAIMANT_BYTES: u64 = size_of::<(u64, bool)>() as u64;

/// Approximate bytes a new key costs the tracker.
fn key_footprint(key: &IndexKey) -> u64 {
    let values: usize = key
        .iter()
        .map(|value| match value {
            PropertyValue::Str(s) => size_of::<PropertyValue>() + s.len(),
            PropertyValue::Bool(_) | PropertyValue::Int(_) => size_of::<PropertyValue>(),
        })
        .sum();
    (size_of::<((IndexId, IndexKey), Claimants)>() + values) as u64
}

/// Unique-index entries seen across all ranges, keyed by index and key.
///
/// Its growth is charged to the run's [`MemoryTracker`] until
/// [`DuplicateTracker::release`].
pub struct DuplicateTracker {
    shards: Vec<Mutex<FxHashMap<(IndexId, IndexKey), Claimants>>>,
    held: AtomicU64,
}

impl DuplicateTracker {
    fn new(shards: usize) -> Self {
        Self {
            shards: (0..shards.max(1)).map(|_| Mutex::default()).collect(),
            held: AtomicU64::new(0),
        }
    }

    pub fn record(
        &self,
        memory: &MemoryTracker,
        index: IndexId,
        key: &IndexKey,
        entity: u64,
        matched: bool,
    ) {
        let shard = worker_shard(self.shards.len());
        let grown = match self.shards[shard].lock().entry((index, key.clone())) {
            Entry::Occupied(mut slot) => {
                if slot.get_mut().add(entity, matched) {
                    CLAIMANT_BYTES
                } else {
                    0
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(Claimants::default()).add(entity, matched);
                key_footprint(key)
            }
        };
        if grown > 0 {
            self.held.fetch_add(grown, Ordering::Relaxed);
            memory.allocate(grown);
        }
    }

    /// Bytes currently charged to the memory tracker.
    pub fn held_bytes(&self) -> u64 {
        self.held.load(Ordering::Relaxed)
    }

    /// Returns the charged bytes to `memory`. Calling it again is a no-op.
    pub fn release(&self, memory: &MemoryTracker) {
        memory.release(self.held.swap(0, Ordering::AcqRel));
    }

    /// Drains every shard into one map.
    pub fn merged(&self) -> FxHashMap<(IndexId, IndexKey), Claimants> {
        let mut merged: FxHashMap<(IndexId, IndexKey), Claimants> = FxHashMap::default();
        for shard in &self.shards {
            for (key, claimants) in shard.lock().drain() {
                let slot = merged.entry(key).or_default();
                for (entity, matched) in claimants.entities {
                    slot.add(entity, matched);
                }
            }
        }
        merged
    }
}

/// All cross-range state of one run.
pub struct GlobalState {
    /// Relationships reached by walking their source node's chain.
    pub reached_from_src: AtomicBitSet,
    /// Relationships reached by walking their target node's chain.
    pub reached_from_dst: AtomicBitSet,
    pub dense_nodes: AtomicBitSet,
    /// Property records some chain points at.
    pub referenced_properties: AtomicBitSet,
    pub counts: CountsTally,
    pub degrees: DegreeTally,
    pub duplicates: DuplicateTracker,
}

impl GlobalState {
    /// `workers` sizes the shards; one extra shard serves callers outside
    /// the worker pool.
    pub fn new(high: HighIds, tokens: &TokenHolders, workers: usize) -> Self {
        let shards = workers + 1;
        Self {
            reached_from_src: AtomicBitSet::new(high.relationships),
            reached_from_dst: AtomicBitSet::new(high.relationships),
            dense_nodes: AtomicBitSet::new(high.nodes),
            referenced_properties: AtomicBitSet::new(high.properties),
            counts: CountsTally::new(tokens),
            degrees: DegreeTally::new(shards),
            duplicates: DuplicateTracker::new(shards),
        }
    }

    pub fn heap_bytes(&self) -> u64 {
        self.reached_from_src.heap_bytes()
            + self.reached_from_dst.heap_bytes()
            + self.dense_nodes.heap_bytes()
            + self.referenced_properties.heap_bytes()
    }
}
