//! Read-only record store access and its paged implementation.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::record::{
    NodeRecord, PropertyRecord, RelationshipRecord, NODE_RECORD_SIZE, PROPERTY_RECORD_SIZE,
    RELATIONSHIP_RECORD_SIZE,
};
use super::schema::SchemaRule;
use super::tokens::TokenHolders;
use crate::primitives::bytes::le;
use crate::primitives::pager::PageCache;
use crate::types::{
    EntityType, NodeId, PageId, PropertyId, RelationshipId, Result, StoreError,
};

const MAGIC: &[u8; 8] = b"SMBRCHK\0";
const FORMAT_VERSION: u16 = 1;
const META_LEN: usize = 40;
const META_CRC_OFFSET: usize = META_LEN;

/// Exclusive upper bounds of the three id spaces.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HighIds {
    /// Node slots in use or once used.
    pub nodes: u64,
    /// Relationship slots in use or once used.
    pub relationships: u64,
    /// Property slots in use or once used.
    pub properties: u64,
}

impl HighIds {
    /// High id of the `entity_type` id space.
    pub fn of(&self, entity_type: EntityType) -> u64 {
        match entity_type {
            EntityType::Node => self.nodes,
            EntityType::Relationship => self.relationships,
        }
    }
}

/// Read-only view of a quiesced store.
///
/// Implementations distinguish a record that decodes badly
/// ([`StoreError::Malformed`]) from one that cannot be read at all.
pub trait StoreAccess: Send + Sync {
    /// High ids of the three record sections.
    fn high_ids(&self) -> HighIds;
    /// Reads node `id`.
    ///
    /// # Errors
    ///
    /// [`StoreError::Malformed`] for undecodable bytes; any other error means
    /// the record could not be read at all.
    fn node(&self, id: NodeId) -> Result<NodeRecord>;
    /// Reads relationship `id`; errors as for [`StoreAccess::node`].
    fn relationship(&self, id: RelationshipId) -> Result<RelationshipRecord>;
    /// Reads property `id`; errors as for [`StoreAccess::node`].
    fn property(&self, id: PropertyId) -> Result<PropertyRecord>;
    /// Token names of the store.
    fn tokens(&self) -> &TokenHolders;
    /// Schema rules of the store.
    fn schema(&self) -> &[SchemaRule];
}

/// Kinds of record sections in a store file.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Section {
    /// Node records.
    Nodes,
    /// Relationship records.
    Relationships,
    /// Property records.
    Properties,
}

impl Section {
    /// Encoded size of one record in this section.
    pub fn record_size(self) -> usize {
        match self {
            Section::Nodes => NODE_RECORD_SIZE,
            Section::Relationships => RELATIONSHIP_RECORD_SIZE,
            Section::Properties => PROPERTY_RECORD_SIZE,
        }
    }
}

/// Page geometry of a store file.
///
/// Page 0 holds the meta block; the node, relationship and property sections
/// follow in that order, each padded to whole pages.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct StoreLayout {
    /// Bytes per page.
    pub page_size: u32,
    /// High ids the sections are sized for.
    pub high: HighIds,
}

impl StoreLayout {
    /// Layout for `page_size` pages holding `high`.
    ///
    /// # Errors
    ///
    /// [`StoreError::Invalid`] when a page cannot hold one record of every section.
    pub fn new(page_size: u32, high: HighIds) -> Result<Self> {
        if (page_size as usize) < PROPERTY_RECORD_SIZE.max(META_LEN + 4) {
            return Err(StoreError::Invalid("page size smaller than a record"));
        }
        Ok(Self { page_size, high })
    }

    /// Records that fit in one page of `section`.
    pub fn records_per_page(&self, section: Section) -> u64 {
        (self.page_size as usize / section.record_size()) as u64
    }

    fn section_high(&self, section: Section) -> u64 {
        match section {
            Section::Nodes => self.high.nodes,
            Section::Relationships => self.high.relationships,
            Section::Properties => self.high.properties,
        }
    }

    /// Pages the section spans; at least one.
    pub fn section_pages(&self, section: Section) -> u64 {
        self.section_high(section)
            .div_ceil(self.records_per_page(section))
    }

    fn section_start(&self, section: Section) -> u64 {
        let nodes = 1;
        let relationships = nodes + self.section_pages(Section::Nodes);
        let properties = relationships + self.section_pages(Section::Relationships);
        match section {
            Section::Nodes => nodes,
            Section::Relationships => relationships,
            Section::Properties => properties,
        }
    }

    /// Meta page plus every section.
    pub fn total_pages(&self) -> u64 {
        self.section_start(Section::Properties) + self.section_pages(Section::Properties)
    }

    /// Page and byte offset of record `id`.
    pub fn locate(&self, section: Section, id: u64) -> (PageId, usize) {
        let per_page = self.records_per_page(section);
        let page = self.section_start(section) + id / per_page;
        let offset = (id % per_page) as usize * section.record_size();
        (PageId(page), offset)
    }

    /// Encodes the meta block into the first bytes of `page`.
    pub fn encode_meta(&self, page: &mut [u8]) {
        page[..META_LEN + 4].fill(0);
        page[..MAGIC.len()].copy_from_slice(MAGIC);
        page[8..10].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
        le::put_u32(page, 12, self.page_size);
        le::put_u64(page, 16, self.high.nodes);
        le::put_u64(page, 24, self.high.relationships);
        le::put_u64(page, 32, self.high.properties);
        let crc = crc32fast::hash(&page[..META_LEN]);
        le::put_u32(page, META_CRC_OFFSET, crc);
    }

    /// Reads the layout back from page 0, verifying its checksum.
    pub fn decode_meta(page: &[u8]) -> Result<Self> {
        if page.len() < META_LEN + 4 {
            return Err(StoreError::Corruption("meta page shorter than expected"));
        }
        if &page[..MAGIC.len()] != MAGIC {
            return Err(StoreError::Corruption("invalid store magic"));
        }
        let version = u16::from_le_bytes([page[8], page[9]]);
        if version != FORMAT_VERSION {
            return Err(StoreError::Corruption("unsupported store format version"));
        }
        let stored = le::get_u32(page, META_CRC_OFFSET);
        if crc32fast::hash(&page[..META_LEN]) != stored {
            return Err(StoreError::Corruption("meta checksum mismatch"));
        }
        let high = HighIds {
            nodes: le::get_u64(page, 16),
            relationships: le::get_u64(page, 24),
            properties: le::get_u64(page, 32),
        };
        Self::new(le::get_u32(page, 12), high)
    }
}

/// [`StoreAccess`] reading records through a [`PageCache`].
pub struct PagedStore {
    cache: Arc<PageCache>,
    layout: StoreLayout,
    tokens: TokenHolders,
    schema: Vec<SchemaRule>,
}

impl PagedStore {
    /// Opens the store behind `cache`, validating the meta page.
    pub fn open(
        cache: Arc<PageCache>,
        tokens: TokenHolders,
        schema: Vec<SchemaRule>,
    ) -> Result<Self> {
        if cache.file_pages()? == 0 {
            return Err(StoreError::Corruption("store file is empty"));
        }
        let meta = cache.read_page(PageId(0))?;
        let layout = StoreLayout::decode_meta(&meta)?;
        if layout.page_size != cache.page_size() {
            return Err(StoreError::Corruption("store page size differs from cache"));
        }
        if cache.file_pages()? < layout.total_pages() {
            return Err(StoreError::Corruption("store file truncated"));
        }
        debug!(
            nodes = layout.high.nodes,
            relationships = layout.high.relationships,
            properties = layout.high.properties,
            pages = layout.total_pages(),
            "opened store"
        );
        Ok(Self {
            cache,
            layout,
            tokens,
            schema,
        })
    }

    /// Geometry the store was opened with.
    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    /// Page cache the store reads through.
    pub fn cache(&self) -> &Arc<PageCache> {
        &self.cache
    }

    fn read<T>(
        &self,
        section: Section,
        id: u64,
        decode: impl FnOnce(&[u8]) -> Result<T>,
    ) -> Result<T> {
        if id >= self.layout.section_high(section) {
            return Err(StoreError::Invalid("record id beyond high id"));
        }
        let (page, offset) = self.layout.locate(section, id);
        let data = self.cache.read_page(page)?;
        decode(&data[offset..offset + section.record_size()])
    }
}

impl StoreAccess for PagedStore {
    fn high_ids(&self) -> HighIds {
        self.layout.high
    }

    fn node(&self, id: NodeId) -> Result<NodeRecord> {
        self.read(Section::Nodes, id.0, |bytes| NodeRecord::decode(id, bytes))
    }

    fn relationship(&self, id: RelationshipId) -> Result<RelationshipRecord> {
        self.read(Section::Relationships, id.0, |bytes| {
            RelationshipRecord::decode(id, bytes)
        })
    }

    fn property(&self, id: PropertyId) -> Result<PropertyRecord> {
        self.read(Section::Properties, id.0, |bytes| {
            PropertyRecord::decode(id, bytes)
        })
    }

    fn tokens(&self) -> &TokenHolders {
        &self.tokens
    }

    fn schema(&self) -> &[SchemaRule] {
        &self.schema
    }
}
