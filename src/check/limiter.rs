//! Splits entity id spaces into ranges whose per-entity caches fit a memory
//! budget.
//!
//! The budget left for range caches is the total memory minus what the page
//! cache and other off-heap structures already hold. Dividing it by the
//! per-entity footprint gives the range stride; each id space `[0, high)` is
//! walked in strides, the last range clipped to `high`. The result depends
//! only on the inputs, so rerunning with the same budget yields the same
//! ranges.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::error::{CheckError, Result};
use crate::types::EntityType;

/// Default per-entity cache footprint in bytes.
pub const CACHE_LINE_SIZE_BYTES: u64 = 64;

/// Default total memory assumed available to a check.
pub const DEFAULT_TOTAL_MEMORY: u64 = 1 << 30;

/// A contiguous half-open slice `[low, high)` of one entity id space.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRange {
    /// Id space the range belongs to.
    pub entity_type: EntityType,
    /// First id in the range.
    pub low: u64,
    /// One past the last id.
    pub high: u64,
}

impl EntityRange {
    /// Returns `None` unless `low < high`.
    pub fn new(entity_type: EntityType, low: u64, high: u64) -> Option<Self> {
        (low < high).then_some(Self {
            entity_type,
            low,
            high,
        })
    }

    /// Number of ids in the range.
    pub fn len(&self) -> u64 {
        self.high - self.low
    }

    /// `true` when the range holds no ids.
    pub fn is_empty(&self) -> bool {
        self.low >= self.high
    }

    /// `true` when `id` lies in the range.
    pub fn contains(&self, id: u64) -> bool {
        self.low <= id && id < self.high
    }

    /// Restricts the range to `[0, high_id)`.
    pub fn clipped(&self, high_id: u64) -> Option<Self> {
        Self::new(self.entity_type, self.low, self.high.min(high_id))
    }

    /// The ids of the range, in order.
    pub fn ids(&self) -> std::ops::Range<u64> {
        self.low..self.high
    }
}

impl fmt::Display for EntityRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}..{}", self.entity_type, self.low, self.high)
    }
}

/// Memory available to a check.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryBudget {
    /// Total bytes the check may use, page cache included.
    pub total_memory: u64,
    /// Bytes held by the page cache.
    pub page_cache_memory: u64,
    /// Bytes held by other structures outside the range caches.
    pub off_heap_memory: u64,
    /// Bytes cached per entity while its range is checked.
    pub per_entity_footprint: u64,
}

impl Default for MemoryBudget {
    fn default() -> Self {
        Self {
            total_memory: DEFAULT_TOTAL_MEMORY,
            page_cache_memory: 0,
            off_heap_memory: 0,
            per_entity_footprint: CACHE_LINE_SIZE_BYTES,
        }
    }
}

impl MemoryBudget {
    /// Bytes left for range caches.
    pub fn range_budget(&self) -> u64 {
        self.total_memory
            .saturating_sub(self.page_cache_memory)
            .saturating_sub(self.off_heap_memory)
    }

    /// Entities whose caches fit in one range.
    ///
    /// # Errors
    ///
    /// [`CheckError::Configuration`] when the footprint is zero or not even
    /// one entity fits.
    pub fn entities_per_range(&self) -> Result<u64> {
        entities_per_range(self.range_budget(), self.per_entity_footprint)
    }
}

fn entities_per_range(available: u64, per_entity: u64) -> Result<u64> {
    if per_entity == 0 {
        return Err(CheckError::configuration(
            "per-entity footprint must be non-zero",
        ));
    }
    let entities = available / per_entity;
    if entities == 0 {
        return Err(CheckError::configuration(format!(
            "memory budget of {available} bytes cannot hold a single {per_entity}-byte entity"
        )));
    }
    Ok(entities)
}

fn stride(entity_type: EntityType, high_id: u64, per_range: u64) -> Vec<EntityRange> {
    let mut ranges = Vec::with_capacity(high_id.div_ceil(per_range) as usize);
    let mut low = 0;
    while low < high_id {
        let high = low.saturating_add(per_range).min(high_id);
        ranges.push(EntityRange {
            entity_type,
            low,
            high,
        });
        low = high;
    }
    ranges
}

/// Node ranges followed by relationship ranges for the given budget.
///
/// An id space of size zero contributes no ranges.
pub fn compute_ranges(
    available_memory: u64,
    per_entity_footprint: u64,
    high_node_id: u64,
    high_relationship_id: u64,
) -> Result<Vec<EntityRange>> {
    let per_range = entities_per_range(available_memory, per_entity_footprint)?;
    let mut ranges = stride(EntityType::Node, high_node_id, per_range);
    ranges.extend(stride(
        EntityType::Relationship,
        high_relationship_id,
        per_range,
    ));
    Ok(ranges)
}

/// Sorts ranges of one entity type by `low` and merges any that overlap or
/// touch, so every id is covered at most once.
pub fn coalesce(mut ranges: Vec<EntityRange>) -> Vec<EntityRange> {
    ranges.sort_by_key(|range| (range.entity_type, range.low));
    let mut merged: Vec<EntityRange> = Vec::with_capacity(ranges.len());
    for range in ranges {
        match merged.last_mut() {
            Some(last) if last.entity_type == range.entity_type && range.low <= last.high => {
                last.high = last.high.max(range.high);
            }
            _ => merged.push(range),
        }
    }
    merged
}

/// Range plan for one check run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemoryLimiter {
    budget: MemoryBudget,
    entities_per_range: u64,
    node_ranges: Vec<EntityRange>,
    relationship_ranges: Vec<EntityRange>,
}

impl MemoryLimiter {
    /// Plans ranges of `budget.entities_per_range()` entities over both id spaces.
    ///
    /// # Errors
    ///
    /// [`CheckError::Configuration`] when the budget cannot hold one entity.
    pub fn new(budget: MemoryBudget, high_node_id: u64, high_relationship_id: u64) -> Result<Self> {
        let per_range = budget.entities_per_range()?;
        Ok(Self {
            budget,
            entities_per_range: per_range,
            node_ranges: stride(EntityType::Node, high_node_id, per_range),
            relationship_ranges: stride(EntityType::Relationship, high_relationship_id, per_range),
        })
    }

    /// Budget the plan was derived from.
    pub fn budget(&self) -> &MemoryBudget {
        &self.budget
    }

    /// Stride every range except the last of each id space uses.
    pub fn entities_per_range(&self) -> u64 {
        self.entities_per_range
    }

    /// Planned ranges for `entity_type`, ordered by `low`.
    pub fn ranges(&self, entity_type: EntityType) -> &[EntityRange] {
        match entity_type {
            EntityType::Node => &self.node_ranges,
            EntityType::Relationship => &self.relationship_ranges,
        }
    }

    /// Ranges planned for `entity_type`.
    pub fn number_of_ranges(&self, entity_type: EntityType) -> usize {
        self.ranges(entity_type).len()
    }

    /// Sweeps needed to cover the larger id space.
    pub fn number_of_passes(&self) -> usize {
        self.node_ranges.len().max(self.relationship_ranges.len())
    }

    /// `true` when one pass covers both id spaces.
    pub fn is_single_range(&self) -> bool {
        self.number_of_passes() <= 1
    }
}

/// Builds a limiter from `(page_cache_memory, high_node_id, high_relationship_id)`.
pub type MemoryLimiterFactory = Arc<dyn Fn(u64, u64, u64) -> Result<MemoryLimiter> + Send + Sync>;

/// Factory that plugs the page cache's size into `budget`.
pub fn budget_factory(budget: MemoryBudget) -> MemoryLimiterFactory {
    Arc::new(move |page_cache_memory, high_node_id, high_relationship_id| {
        MemoryLimiter::new(
            MemoryBudget {
                page_cache_memory,
                ..budget
            },
            high_node_id,
            high_relationship_id,
        )
    })
}
