//! JSON sidecar holding everything about a store that is not a record:
//! tokens, schema rules, index contents and the precomputed counts.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::builder::BuiltStore;
use super::counts::{CountsStore, DegreesStore};
use super::index::{IndexEntry, MemoryIndex, MemoryIndexLookup};
use super::schema::{self, SchemaRule};
use super::store::PagedStore;
use super::tokens::TokenHolders;
use crate::primitives::io::{FileIo, MemIo, StdFileIo};
use crate::primitives::pager::{PageCache, PageCacheOptions, PageCacheTracer};
use crate::types::{IndexId, Result, StoreError};

/// Entries of one index.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexContents {
    /// Rule id of the index.
    pub index: IndexId,
    /// Entries the index holds, in any order.
    pub entries: Vec<IndexEntry>,
}

/// Non-record state of a store, persisted as JSON beside the record file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    /// Page size the record file was written with.
    pub page_size: u32,
    /// Label, type and property key names.
    pub tokens: TokenHolders,
    /// Index and constraint rules.
    pub schema: Vec<SchemaRule>,
    /// Contents of every index rule.
    pub indexes: Vec<IndexContents>,
    /// Precomputed node and relationship counts.
    pub counts: CountsStore,
    /// Precomputed per-node degrees.
    pub degrees: DegreesStore,
}

impl Catalog {
    /// `<db>.catalog.json` next to the record file.
    pub fn sidecar_path(db: &Path) -> PathBuf {
        let mut name = db.as_os_str().to_owned();
        name.push(".catalog.json");
        PathBuf::from(name)
    }

    /// Reads a catalog written by [`Catalog::save`].
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        serde_json::from_slice(&bytes).map_err(|err| StoreError::Io(err.into()))
    }

    /// Writes the catalog as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self).map_err(|err| StoreError::Io(err.into()))?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Materialises one in-memory index per index rule.
    ///
    /// Index rules without stored contents open empty.
    pub fn index_lookup(&self) -> MemoryIndexLookup {
        let mut lookup = MemoryIndexLookup::new();
        for descriptor in schema::indexes(&self.schema) {
            let index = lookup.register(MemoryIndex::new(descriptor.clone()));
            if let Some(contents) = self.indexes.iter().find(|c| c.index == descriptor.id) {
                for entry in &contents.entries {
                    index.insert(entry.entity, entry.key.clone());
                }
            }
        }
        lookup
    }
}

/// A store opened for checking: the page cache, record access and the
/// collaborators restored from the catalog.
pub struct OpenedStore {
    /// Page cache over the record file.
    pub cache: Arc<PageCache>,
    /// Record view over the cache.
    pub store: Arc<PagedStore>,
    /// Indexes rebuilt from the catalog.
    pub indexes: Arc<MemoryIndexLookup>,
    /// Counts loaded from the catalog.
    pub counts: CountsStore,
    /// Degrees loaded from the catalog.
    pub degrees: DegreesStore,
}

impl OpenedStore {
    /// Opens a store over `io` with a cache of `cache_pages` pages.
    pub fn open(
        io: Arc<dyn FileIo>,
        catalog: Catalog,
        cache_pages: usize,
        tracer: Arc<dyn PageCacheTracer>,
    ) -> Result<Self> {
        let cache = Arc::new(PageCache::new(
            io,
            PageCacheOptions {
                page_size: catalog.page_size,
                cache_pages,
            },
            tracer,
        )?);
        let indexes = Arc::new(catalog.index_lookup());
        let Catalog {
            tokens,
            schema,
            counts,
            degrees,
            ..
        } = catalog;
        let store = Arc::new(PagedStore::open(Arc::clone(&cache), tokens, schema)?);
        Ok(Self {
            cache,
            store,
            indexes,
            counts,
            degrees,
        })
    }

    /// Opens `<db>` read-only together with its catalog sidecar.
    pub fn open_path(
        db: &Path,
        cache_pages: usize,
        tracer: Arc<dyn PageCacheTracer>,
    ) -> Result<Self> {
        let catalog = Catalog::load(&Catalog::sidecar_path(db))?;
        let io = StdFileIo::open_read_only(db)?;
        debug!(path = %db.display(), cache_pages, "opening store");
        Self::open(Arc::new(io), catalog, cache_pages, tracer)
    }
}

impl BuiltStore {
    /// Writes the record file and its catalog sidecar.
    pub fn write_to_path(&self, db: &Path) -> Result<()> {
        let io = StdFileIo::open(db)?;
        io.truncate(0)?;
        io.write_at(0, &self.image)?;
        io.sync_all()?;
        self.catalog.save(&Catalog::sidecar_path(db))
    }

    /// Opens a copy of the image held in memory.
    pub fn open_in_memory(
        &self,
        cache_pages: usize,
        tracer: Arc<dyn PageCacheTracer>,
    ) -> Result<OpenedStore> {
        let io = MemIo::new();
        io.write_at(0, &self.image)?;
        OpenedStore::open(Arc::new(io), self.catalog.clone(), cache_pages, tracer)
    }

    /// Like [`BuiltStore::open_in_memory`] but over a caller-supplied file.
    pub fn open_on(
        &self,
        io: Arc<dyn FileIo>,
        cache_pages: usize,
        tracer: Arc<dyn PageCacheTracer>,
    ) -> Result<OpenedStore> {
        io.write_at(0, &self.image)?;
        OpenedStore::open(io, self.catalog.clone(), cache_pages, tracer)
    }
}
