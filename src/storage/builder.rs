//! Lays out consistent stores for tests, benchmarks and the demo command.
//!
//! [`GraphBuilder`] keeps records in memory and links chains the way a
//! writer would. Raw record accessors let callers corrupt the result before
//! it is built; [`BuiltStore`] exposes the encoded image for byte-level damage.

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use super::catalog::{Catalog, IndexContents};
use super::counts::{CountsStore, DegreeKey, DegreesStore};
use super::index::{IndexEntry, IndexKey};
use super::record::{
    NodeRecord, PropertyOwner, PropertyRecord, PropertyValue, RelationshipRecord, MAX_LABELS,
};
use super::schema::{
    ConstraintDescriptor, ConstraintKind, IndexDescriptor, IndexKind, SchemaRule, SchemaTarget,
};
use super::store::{HighIds, Section, StoreLayout};
use super::tokens::TokenHolders;
use crate::primitives::pager::DEFAULT_PAGE_SIZE;
use crate::types::{
    Direction, EntityType, IndexId, LabelId, NodeId, PropKeyId, PropertyId, RelationshipId,
    Result, StoreError, TypeId,
};

/// Relationship count at which [`GraphBuilder::build`] marks a node dense.
pub const DEFAULT_DENSE_THRESHOLD: usize = 50;

/// In-memory graph that encodes into a store image plus catalog.
pub struct GraphBuilder {
    tokens: TokenHolders,
    schema: Vec<SchemaRule>,
    nodes: Vec<NodeRecord>,
    relationships: Vec<RelationshipRecord>,
    properties: Vec<PropertyRecord>,
    page_size: u32,
    dense_threshold: usize,
    next_rule: u64,
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphBuilder {
    /// An empty builder with the default page size.
    pub fn new() -> Self {
        Self {
            tokens: TokenHolders::default(),
            schema: Vec::new(),
            nodes: Vec::new(),
            relationships: Vec::new(),
            properties: Vec::new(),
            page_size: DEFAULT_PAGE_SIZE,
            dense_threshold: DEFAULT_DENSE_THRESHOLD,
            next_rule: 1,
        }
    }

    /// Page size of the encoded image.
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    /// Nodes with at least `threshold` relationships are flagged dense.
    pub fn with_dense_threshold(mut self, threshold: usize) -> Self {
        self.dense_threshold = threshold.max(1);
        self
    }

    /// Token dictionaries, for registering tokens no record uses.
    pub fn tokens_mut(&mut self) -> &mut TokenHolders {
        &mut self.tokens
    }

    /// Id of label `name`, registering it on first use.
    pub fn label(&mut self, name: &str) -> LabelId {
        self.tokens.label(name)
    }

    /// Id of relationship type `name`, registering it on first use.
    pub fn rel_type(&mut self, name: &str) -> TypeId {
        self.tokens.rel_type(name)
    }

    /// Id of property key `name`, registering it on first use.
    pub fn property_key(&mut self, name: &str) -> PropKeyId {
        self.tokens.property_key(name)
    }

    /// High ids of the records added so far.
    pub fn high_ids(&self) -> HighIds {
        HighIds {
            nodes: self.nodes.len() as u64,
            relationships: self.relationships.len() as u64,
            properties: self.properties.len() as u64,
        }
    }

    /// Creates a node carrying `labels` (at most four).
    pub fn create_node(&mut self, labels: &[LabelId]) -> NodeId {
        let id = NodeId(self.nodes.len() as u64);
        let mut record = NodeRecord::unused(id);
        record.in_use = true;
        record.labels = labels.iter().copied().take(MAX_LABELS).collect();
        self.nodes.push(record);
        id
    }

    /// Creates a relationship and prepends it to both endpoint chains.
    pub fn create_relationship(&mut self, src: NodeId, dst: NodeId, rel_type: TypeId) -> RelationshipId {
        let id = RelationshipId(self.relationships.len() as u64);
        let src_next = self.link(src, id);
        let dst_next = if src == dst { None } else { self.link(dst, id) };
        self.relationships.push(RelationshipRecord {
            id,
            in_use: true,
            rel_type,
            src,
            dst,
            src_next,
            dst_next,
            first_prop: None,
        });
        id
    }

    fn link(&mut self, node: NodeId, rel: RelationshipId) -> Option<RelationshipId> {
        let record = self.nodes.get_mut(node.0 as usize)?;
        record.first_rel.replace(rel)
    }

    /// Sets a property on `owner`, prepending a record to its chain.
    pub fn set_property(
        &mut self,
        owner: PropertyOwner,
        key: PropKeyId,
        value: impl Into<PropertyValue>,
    ) -> PropertyId {
        let id = PropertyId(self.properties.len() as u64);
        let head = match owner {
            PropertyOwner::Node(node) => self
                .nodes
                .get_mut(node.0 as usize)
                .and_then(|n| n.first_prop.replace(id)),
            PropertyOwner::Relationship(rel) => self
                .relationships
                .get_mut(rel.0 as usize)
                .and_then(|r| r.first_prop.replace(id)),
        };
        self.properties.push(PropertyRecord {
            id,
            in_use: true,
            owner,
            key,
            value: value.into(),
            next: head,
        });
        id
    }

    /// Prepends a property record to the node's chain.
    pub fn set_node_property(
        &mut self,
        node: NodeId,
        key: PropKeyId,
        value: impl Into<PropertyValue>,
    ) -> PropertyId {
        self.set_property(PropertyOwner::Node(node), key, value)
    }

    /// Prepends a property record to the relationship's chain.
    pub fn set_relationship_property(
        &mut self,
        rel: RelationshipId,
        key: PropKeyId,
        value: impl Into<PropertyValue>,
    ) -> PropertyId {
        self.set_property(PropertyOwner::Relationship(rel), key, value)
    }

    /// Appends an unused property record that nothing points at.
    pub fn reserve_property(&mut self) -> PropertyId {
        let id = PropertyId(self.properties.len() as u64);
        self.properties.push(PropertyRecord::unused(id));
        id
    }

    fn next_rule_id(&mut self) -> IndexId {
        let id = IndexId(self.next_rule);
        self.next_rule += 1;
        id
    }

    /// Adds a non-unique property index.
    pub fn add_index(&mut self, target: SchemaTarget, kind: IndexKind) -> IndexId {
        let id = self.next_rule_id();
        self.schema.push(SchemaRule::Index(IndexDescriptor {
            id,
            target,
            kind,
            unique: false,
            owner: None,
        }));
        id
    }

    /// Adds a uniqueness constraint and the unique index it owns.
    ///
    /// Returns the index id.
    pub fn add_unique_constraint(&mut self, target: SchemaTarget, kind: IndexKind) -> IndexId {
        let index = self.next_rule_id();
        let constraint = self.next_rule_id();
        self.schema.push(SchemaRule::Index(IndexDescriptor {
            id: index,
            target: target.clone(),
            kind,
            unique: true,
            owner: Some(constraint),
        }));
        self.schema.push(SchemaRule::Constraint(ConstraintDescriptor {
            id: constraint,
            target,
            kind: ConstraintKind::Uniqueness { index },
        }));
        index
    }

    /// Adds an existence constraint on `target`.
    pub fn add_existence_constraint(&mut self, target: SchemaTarget) -> IndexId {
        let id = self.next_rule_id();
        self.schema.push(SchemaRule::Constraint(ConstraintDescriptor {
            id,
            target,
            kind: ConstraintKind::Existence,
        }));
        id
    }

    /// Raw schema rules, for tampering before [`GraphBuilder::build`].
    pub fn schema_mut(&mut self) -> &mut Vec<SchemaRule> {
        &mut self.schema
    }

    /// Node record `id`, for tampering before [`GraphBuilder::build`].
    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut NodeRecord> {
        self.nodes.get_mut(id.0 as usize)
    }

    /// Relationship record `id`.
    pub fn relationship_mut(&mut self, id: RelationshipId) -> Option<&mut RelationshipRecord> {
        self.relationships.get_mut(id.0 as usize)
    }

    /// Property record `id`.
    pub fn property_mut(&mut self, id: PropertyId) -> Option<&mut PropertyRecord> {
        self.properties.get_mut(id.0 as usize)
    }

    /// Live properties of an entity, following its chain.
    fn chain_values(&self, mut next: Option<PropertyId>) -> FxHashMap<PropKeyId, PropertyValue> {
        let mut values = FxHashMap::default();
        let mut steps = 0;
        while let Some(id) = next {
            let Some(record) = self.properties.get(id.0 as usize) else {
                break;
            };
            if !record.in_use || steps > self.properties.len() {
                break;
            }
            values.entry(record.key).or_insert_with(|| record.value.clone());
            next = record.next;
            steps += 1;
        }
        values
    }

    fn index_key(
        values: &FxHashMap<PropKeyId, PropertyValue>,
        properties: &[PropKeyId],
    ) -> Option<IndexKey> {
        properties
            .iter()
            .map(|key| values.get(key).cloned())
            .collect()
    }

    fn index_entries(&self, descriptor: &IndexDescriptor) -> Vec<IndexEntry> {
        let target = &descriptor.target;
        let mut entries = Vec::new();
        match target.entity_type {
            EntityType::Node => {
                for node in self.nodes.iter().filter(|n| n.in_use) {
                    if !node.has_label(LabelId(target.token)) {
                        continue;
                    }
                    let values = self.chain_values(node.first_prop);
                    if let Some(key) = Self::index_key(&values, &target.properties) {
                        entries.push(IndexEntry {
                            entity: node.id.0,
                            key,
                        });
                    }
                }
            }
            EntityType::Relationship => {
                for rel in self.relationships.iter().filter(|r| r.in_use) {
                    if rel.rel_type != TypeId(target.token) {
                        continue;
                    }
                    let values = self.chain_values(rel.first_prop);
                    if let Some(key) = Self::index_key(&values, &target.properties) {
                        entries.push(IndexEntry {
                            entity: rel.id.0,
                            key,
                        });
                    }
                }
            }
        }
        entries
    }

    fn degree_counts(&self) -> FxHashMap<NodeId, usize> {
        let mut degrees: FxHashMap<NodeId, usize> = FxHashMap::default();
        for rel in self.relationships.iter().filter(|r| r.in_use) {
            *degrees.entry(rel.src).or_default() += 1;
            if !rel.is_loop() {
                *degrees.entry(rel.dst).or_default() += 1;
            }
        }
        degrees
    }

    fn counts(&self) -> CountsStore {
        let mut counts = CountsStore::default();
        let mut by_label: FxHashMap<LabelId, u64> = FxHashMap::default();
        let mut total = 0;
        for node in self.nodes.iter().filter(|n| n.in_use) {
            total += 1;
            let mut seen: SmallVec<[LabelId; MAX_LABELS]> = SmallVec::new();
            for label in &node.labels {
                if !seen.contains(label) {
                    seen.push(*label);
                    *by_label.entry(*label).or_default() += 1;
                }
            }
        }
        counts.set_node_count(None, total);
        for (label, count) in by_label {
            counts.set_node_count(Some(label), count);
        }
        let mut by_type: FxHashMap<TypeId, u64> = FxHashMap::default();
        let mut total = 0;
        for rel in self.relationships.iter().filter(|r| r.in_use) {
            total += 1;
            *by_type.entry(rel.rel_type).or_default() += 1;
        }
        counts.set_relationship_count(None, total);
        for (rel_type, count) in by_type {
            counts.set_relationship_count(Some(rel_type), count);
        }
        counts
    }

    fn degrees(&self) -> DegreesStore {
        let mut degrees = DegreesStore::default();
        let mut tally: FxHashMap<DegreeKey, u64> = FxHashMap::default();
        let dense = |id: NodeId| self.nodes.get(id.0 as usize).is_some_and(|n| n.in_use && n.dense);
        for rel in self.relationships.iter().filter(|r| r.in_use) {
            if rel.is_loop() {
                if dense(rel.src) {
                    *tally
                        .entry(DegreeKey {
                            node: rel.src,
                            rel_type: rel.rel_type,
                            direction: Direction::Loop,
                        })
                        .or_default() += 1;
                }
                continue;
            }
            for (node, direction) in [(rel.src, Direction::Outgoing), (rel.dst, Direction::Incoming)] {
                if dense(node) {
                    *tally
                        .entry(DegreeKey {
                            node,
                            rel_type: rel.rel_type,
                            direction,
                        })
                        .or_default() += 1;
                }
            }
        }
        for (key, degree) in tally {
            degrees.set_degree(key, degree);
        }
        degrees
    }

    /// Marks dense nodes, derives indexes and counts, and encodes the image.
    pub fn build(mut self) -> Result<BuiltStore> {
        for (node, degree) in self.degree_counts() {
            if degree >= self.dense_threshold {
                if let Some(record) = self.nodes.get_mut(node.0 as usize) {
                    record.dense = true;
                }
            }
        }
        let layout = StoreLayout::new(self.page_size, self.high_ids())?;
        let mut image = vec![0u8; (layout.total_pages() * self.page_size as u64) as usize];
        layout.encode_meta(&mut image[..self.page_size as usize]);
        for node in &self.nodes {
            node.encode(record_slot(&layout, &mut image, Section::Nodes, node.id.0))?;
        }
        for rel in &self.relationships {
            rel.encode(record_slot(&layout, &mut image, Section::Relationships, rel.id.0))?;
        }
        for prop in &self.properties {
            prop.encode(record_slot(&layout, &mut image, Section::Properties, prop.id.0))?;
        }
        let indexes = super::schema::indexes(&self.schema)
            .map(|descriptor| IndexContents {
                index: descriptor.id,
                entries: self.index_entries(descriptor),
            })
            .collect();
        let catalog = Catalog {
            page_size: self.page_size,
            tokens: self.tokens.clone(),
            schema: self.schema.clone(),
            indexes,
            counts: self.counts(),
            degrees: self.degrees(),
        };
        Ok(BuiltStore {
            layout,
            image,
            catalog,
        })
    }

    /// Generates a seeded random graph with a small schema.
    ///
    /// The same seed always produces the same store.
    pub fn random(seed: u64, nodes: usize, relationships: usize) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut builder = GraphBuilder::new().with_dense_threshold(8);
        let labels = [
            builder.label("Person"),
            builder.label("City"),
            builder.label("Tag"),
        ];
        let types = [builder.rel_type("KNOWS"), builder.rel_type("LIVES_IN")];
        let name = builder.property_key("name");
        let age = builder.property_key("age");
        let since = builder.property_key("since");

        builder.add_unique_constraint(
            SchemaTarget {
                entity_type: EntityType::Node,
                token: labels[0].0,
                properties: vec![name],
            },
            IndexKind::Range,
        );
        builder.add_index(
            SchemaTarget {
                entity_type: EntityType::Node,
                token: labels[0].0,
                properties: vec![age],
            },
            IndexKind::BTree,
        );
        builder.add_index(
            SchemaTarget {
                entity_type: EntityType::Node,
                token: labels[1].0,
                properties: vec![name, age],
            },
            IndexKind::Range,
        );
        builder.add_index(
            SchemaTarget {
                entity_type: EntityType::Relationship,
                token: types[0].0,
                properties: vec![since],
            },
            IndexKind::Range,
        );

        for i in 0..nodes {
            let label_count = rng.gen_range(0..=2);
            let mut chosen: Vec<LabelId> = labels.choose_multiple(&mut rng, label_count).copied().collect();
            chosen.sort();
            let node = builder.create_node(&chosen);
            if rng.gen_bool(0.8) {
                builder.set_node_property(node, name, PropertyValue::Str(format!("n{i}")));
            }
            if rng.gen_bool(0.6) {
                builder.set_node_property(node, age, rng.gen_range(0..100i64));
            }
        }
        if nodes > 0 {
            for _ in 0..relationships {
                let src = NodeId(rng.gen_range(0..nodes as u64));
                let dst = if rng.gen_bool(0.1) {
                    src
                } else {
                    NodeId(rng.gen_range(0..nodes as u64))
                };
                let rel_type = types[rng.gen_range(0..types.len())];
                let rel = builder.create_relationship(src, dst, rel_type);
                if rng.gen_bool(0.5) {
                    builder.set_relationship_property(rel, since, rng.gen_range(1990..2030i64));
                }
            }
        }
        builder
    }
}

fn record_slot<'a>(
    layout: &StoreLayout,
    image: &'a mut [u8],
    section: Section,
    id: u64,
) -> &'a mut [u8] {
    let (page, offset) = layout.locate(section, id);
    let start = (page.0 * layout.page_size as u64) as usize + offset;
    &mut image[start..start + section.record_size()]
}

/// Encoded store image and the catalog describing it.
pub struct BuiltStore {
    /// Geometry the image was laid out with.
    pub layout: StoreLayout,
    /// Encoded store file, meta page included.
    pub image: Vec<u8>,
    /// Tokens, schema, index contents and aggregates.
    pub catalog: Catalog,
}

impl BuiltStore {
    /// Mutable bytes of one encoded record.
    pub fn record_bytes_mut(&mut self, section: Section, id: u64) -> Result<&mut [u8]> {
        let high = match section {
            Section::Nodes => self.layout.high.nodes,
            Section::Relationships => self.layout.high.relationships,
            Section::Properties => self.layout.high.properties,
        };
        if id >= high {
            return Err(StoreError::Invalid("record id beyond high id"));
        }
        Ok(record_slot(&self.layout, &mut self.image, section, id))
    }

    /// Index entries of `index`, for tampering before the store is opened.
    pub fn index_entries_mut(&mut self, index: IndexId) -> Option<&mut Vec<IndexEntry>> {
        self.catalog
            .indexes
            .iter_mut()
            .find(|contents| contents.index == index)
            .map(|contents| &mut contents.entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chains_are_prepended() {
        let mut builder = GraphBuilder::new();
        let knows = builder.rel_type("KNOWS");
        let a = builder.create_node(&[]);
        let b = builder.create_node(&[]);
        let r0 = builder.create_relationship(a, b, knows);
        let r1 = builder.create_relationship(b, a, knows);
        let lp = builder.create_relationship(a, a, knows);
        assert_eq!(builder.nodes[a.0 as usize].first_rel, Some(lp));
        assert_eq!(builder.relationships[lp.0 as usize].src_next, Some(r1));
        assert_eq!(builder.relationships[lp.0 as usize].dst_next, None);
        assert_eq!(builder.relationships[r1.0 as usize].dst_next, Some(r0));
        assert_eq!(builder.nodes[b.0 as usize].first_rel, Some(r1));
    }

    #[test]
    fn record_bytes_cover_exactly_one_record() {
        let mut builder = GraphBuilder::new();
        let a = builder.create_node(&[]);
        builder.create_node(&[]);
        let mut built = builder.build().unwrap();
        let before = built.image.clone();
        let slot = built.record_bytes_mut(Section::Nodes, a.0).unwrap();
        assert_eq!(slot.len(), Section::Nodes.record_size());
        slot.fill(0xAB);
        let changed = before
            .iter()
            .zip(&built.image)
            .filter(|(old, new)| old != new)
            .count();
        assert!(changed <= Section::Nodes.record_size());
        assert!(built.record_bytes_mut(Section::Nodes, 2).is_err());
    }

    #[test]
    fn derived_catalog_matches_graph() {
        let mut builder = GraphBuilder::new().with_dense_threshold(2);
        let person = builder.label("Person");
        let knows = builder.rel_type("KNOWS");
        let name = builder.property_key("name");
        let index = builder.add_index(
            SchemaTarget {
                entity_type: EntityType::Node,
                token: person.0,
                properties: vec![name],
            },
            IndexKind::BTree,
        );
        let a = builder.create_node(&[person]);
        let b = builder.create_node(&[]);
        builder.set_node_property(a, name, "ada");
        builder.set_node_property(b, name, "bob");
        builder.create_relationship(a, b, knows);
        builder.create_relationship(a, a, knows);
        let built = builder.build().unwrap();
        let catalog = &built.catalog;
        assert_eq!(catalog.counts.node_count(None), 2);
        assert_eq!(catalog.counts.node_count(Some(person)), 1);
        assert_eq!(catalog.counts.relationship_count(Some(knows)), 2);
        let entries = &catalog.indexes.iter().find(|c| c.index == index).unwrap().entries;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].entity, a.0);
        let loop_key = DegreeKey {
            node: a,
            rel_type: knows,
            direction: Direction::Loop,
        };
        assert_eq!(catalog.degrees.degree(&loop_key), 1);
    }

    #[test]
    fn random_is_deterministic() {
        let a = GraphBuilder::random(7, 40, 80).build().unwrap();
        let b = GraphBuilder::random(7, 40, 80).build().unwrap();
        assert_eq!(a.image, b.image);
        assert_eq!(a.catalog.counts, b.catalog.counts);
    }
}
