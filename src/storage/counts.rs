use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{Direction, LabelId, NodeId, TypeId};

/// Precomputed entity counts, as maintained by the store.
///
/// `None` keys hold the totals over all labels or types.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountsStore {
    #[serde(with = "pairs")]
    nodes: BTreeMap<Option<LabelId>, u64>,
    #[serde(with = "pairs")]
    relationships: BTreeMap<Option<TypeId>, u64>,
}

impl CountsStore {
    /// Stored count of nodes with `label`; `None` counts every node.
    pub fn node_count(&self, label: Option<LabelId>) -> u64 {
        self.nodes.get(&label).copied().unwrap_or(0)
    }

    /// Stored count of relationships of `rel_type`; `None` counts all.
    pub fn relationship_count(&self, rel_type: Option<TypeId>) -> u64 {
        self.relationships.get(&rel_type).copied().unwrap_or(0)
    }

    /// Overwrites a node count.
    pub fn set_node_count(&mut self, label: Option<LabelId>, count: u64) {
        self.nodes.insert(label, count);
    }

    /// Overwrites a relationship count.
    pub fn set_relationship_count(&mut self, rel_type: Option<TypeId>, count: u64) {
        self.relationships.insert(rel_type, count);
    }

    /// Every stored node count, the overall one included.
    pub fn node_counts(&self) -> impl Iterator<Item = (Option<LabelId>, u64)> + '_ {
        self.nodes.iter().map(|(k, v)| (*k, *v))
    }

    /// Every stored relationship count, the overall one included.
    pub fn relationship_counts(&self) -> impl Iterator<Item = (Option<TypeId>, u64)> + '_ {
        self.relationships.iter().map(|(k, v)| (*k, *v))
    }
}

/// Key of one relationship group degree.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DegreeKey {
    /// Node the degree belongs to.
    pub node: NodeId,
    /// Relationship type counted.
    pub rel_type: TypeId,
    /// Side of the relationship the node is on.
    pub direction: Direction,
}

/// Per-type degrees of dense nodes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DegreesStore {
    #[serde(with = "pairs")]
    degrees: BTreeMap<DegreeKey, u64>,
}

impl DegreesStore {
    /// Stored degree, zero when absent.
    pub fn degree(&self, key: &DegreeKey) -> u64 {
        self.degrees.get(key).copied().unwrap_or(0)
    }

    /// Stores `degree` for `key`.
    pub fn set_degree(&mut self, key: DegreeKey, degree: u64) {
        if degree == 0 {
            self.degrees.remove(&key);
        } else {
            self.degrees.insert(key, degree);
        }
    }

    /// Every stored degree in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&DegreeKey, u64)> + '_ {
        self.degrees.iter().map(|(k, v)| (k, *v))
    }
}

/// Maps with non-string keys serialise as lists of pairs so they survive JSON.
mod pairs {
    use std::collections::BTreeMap;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<K, V, S>(map: &BTreeMap<K, V>, serializer: S) -> Result<S::Ok, S::Error>
    where
        K: Serialize,
        V: Serialize,
        S: Serializer,
    {
        serializer.collect_seq(map.iter())
    }

    pub fn deserialize<'de, K, V, D>(deserializer: D) -> Result<BTreeMap<K, V>, D::Error>
    where
        K: Deserialize<'de> + Ord,
        V: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        let pairs = Vec::<(K, V)>::deserialize(deserializer)?;
        Ok(pairs.into_iter().collect())
    }
}
