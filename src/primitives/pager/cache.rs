use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::Serialize;
use tracing::debug;

use super::frame::Frame;
use super::tracer::{PageCacheTracer, PageFaultEvent};
use crate::primitives::io::FileIo;
use crate::types::{PageId, Result, StoreError};

/// Default page size in bytes.
pub const DEFAULT_PAGE_SIZE: u32 = 8192;

/// Configuration options for the page cache.
#[derive(Clone, Debug)]
pub struct PageCacheOptions {
    /// Size of each page in bytes.
    pub page_size: u32,
    /// Number of frames kept in memory.
    pub cache_pages: usize,
}

impl Default for PageCacheOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            cache_pages: 1024,
        }
    }
}

/// Statistics tracking page cache operations.
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct PageCacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of page evictions from cache.
    pub evictions: u64,
    /// Misses whose read from the backing file failed.
    pub failed_reads: u64,
}

impl PageCacheStats {
    /// Fraction of accesses served from memory, or `None` before any access.
    pub fn hit_ratio(&self) -> Option<f64> {
        let total = self.hits + self.misses;
        (total > 0).then(|| self.hits as f64 / total as f64)
    }
}

impl fmt::Display for PageCacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hits={} misses={} evictions={} failed_reads={}",
            self.hits, self.misses, self.evictions, self.failed_reads
        )
    }
}

struct CacheInner {
    frames: Vec<Frame>,
    page_table: FxHashMap<PageId, usize>,
    free: Vec<usize>,
    hand: usize,
    stats: PageCacheStats,
}

impl CacheInner {
    /// Advances the clock hand until it finds a frame whose reference bit is clear.
    fn clock_victim(&mut self) -> usize {
        loop {
            let idx = self.hand;
            self.hand = (self.hand + 1) % self.frames.len();
            let frame = &mut self.frames[idx];
            if frame.reference {
                frame.reference = false;
            } else {
                return idx;
            }
        }
    }
}

/// Read-only page cache over a [`FileIo`].
///
/// Every miss is reported to the configured [`PageCacheTracer`] as a
/// [`PageFaultEvent`]; reclaiming an occupied frame opens the fault's single
/// eviction event.
pub struct PageCache {
    io: Arc<dyn FileIo>,
    page_size: usize,
    capacity: usize,
    tracer: Arc<dyn PageCacheTracer>,
    inner: Mutex<CacheInner>,
}

impl PageCache {
    /// Creates a cache over `io`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Invalid`] for a zero page size or zero frames.
    pub fn new(
        io: Arc<dyn FileIo>,
        options: PageCacheOptions,
        tracer: Arc<dyn PageCacheTracer>,
    ) -> Result<Self> {
        if options.page_size == 0 {
            return Err(StoreError::Invalid("page size must be non-zero"));
        }
        if options.cache_pages == 0 {
            return Err(StoreError::Invalid("page cache needs at least one frame"));
        }
        let frames = (0..options.cache_pages).map(|_| Frame::empty()).collect();
        let free = (0..options.cache_pages).rev().collect();
        Ok(Self {
            io,
            page_size: options.page_size as usize,
            capacity: options.cache_pages,
            tracer,
            inner: Mutex::new(CacheInner {
                frames,
                page_table: FxHashMap::default(),
                free,
                hand: 0,
                stats: PageCacheStats::default(),
            }),
        })
    }

    /// Returns the page size in bytes.
    pub fn page_size(&self) -> u32 {
        self.page_size as u32
    }

    /// Number of frames.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes of memory held by the frames when the cache is full.
    pub fn memory_bytes(&self) -> u64 {
        self.capacity as u64 * self.page_size as u64
    }

    /// Tracer receiving fault and eviction events.
    pub fn tracer(&self) -> &Arc<dyn PageCacheTracer> {
        &self.tracer
    }

    /// Number of whole pages in the backing file.
    pub fn file_pages(&self) -> Result<u64> {
        Ok(self.io.len()? / self.page_size as u64)
    }

    /// Returns a snapshot of current cache statistics.
    pub fn stats(&self) -> PageCacheStats {
        self.inner.lock().stats
    }

    /// Returns the image of page `id`, faulting it in on a miss.
    ///
    /// # Errors
    ///
    /// Propagates the backing file's read error; the fault is marked failed
    /// and no frame is populated.
    pub fn read_page(&self, id: PageId) -> Result<Arc<[u8]>> {
        let mut inner = self.inner.lock();
        if let Some(&idx) = inner.page_table.get(&id) {
            inner.stats.hits += 1;
            let frame = &mut inner.frames[idx];
            frame.reference = true;
            if let Some(data) = frame.data.as_ref() {
                return Ok(Arc::clone(data));
            }
        }
        inner.stats.misses += 1;

        let mut fault = PageFaultEvent::begin(self.tracer.as_ref(), id);
        fault.set_free_list_size(inner.free.len());
        let idx = match inner.free.pop() {
            Some(idx) => idx,
            None => {
                let victim = inner.clock_victim();
                let mut eviction = fault
                    .begin_eviction(victim as u64)
                    .map_err(|_| StoreError::Invalid("eviction already begun for fault"))?;
                if let Some(old) = inner.frames[victim].clear() {
                    inner.page_table.remove(&old);
                    eviction.set_file_page_id(old);
                }
                eviction.close();
                inner.stats.evictions += 1;
                victim
            }
        };
        fault.set_cache_page_id(idx as u64);

        let mut buf = vec![0u8; self.page_size];
        let offset = id.0 * self.page_size as u64;
        if let Err(err) = self.io.read_at(offset, &mut buf) {
            fault.set_exception(&err);
            inner.stats.failed_reads += 1;
            inner.free.push(idx);
            debug!(page = id.0, error = %err, "page fault failed");
            return Err(err);
        }
        fault.add_bytes_read(buf.len() as u64);
        fault.close();

        let data: Arc<[u8]> = buf.into();
        inner.frames[idx].install(id, Arc::clone(&data));
        inner.page_table.insert(id, idx);
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::io::{FaultyIo, MemIo};
    use crate::primitives::pager::CountingTracer;

    fn seeded_io(pages: u64, page_size: u32) -> MemIo {
        let io = MemIo::new();
        for page in 0..pages {
            let buf = vec![page as u8; page_size as usize];
            io.write_at(page * page_size as u64, &buf).unwrap();
        }
        io
    }

    #[test]
    fn hits_after_first_fault() {
        let tracer = Arc::new(CountingTracer::new());
        let cache = PageCache::new(
            Arc::new(seeded_io(4, 128)),
            PageCacheOptions {
                page_size: 128,
                cache_pages: 4,
            },
            tracer.clone(),
        )
        .unwrap();
        let first = cache.read_page(PageId(2)).unwrap();
        let second = cache.read_page(PageId(2)).unwrap();
        assert_eq!(first[0], 2);
        assert_eq!(second[0], 2);
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        let totals = tracer.totals();
        assert_eq!(totals.faults, 1);
        assert_eq!(totals.bytes_read, 128);
        assert_eq!(totals.evictions, 0);
    }

    #[test]
    fn full_cache_evicts_once_per_fault() {
        let tracer = Arc::new(CountingTracer::new());
        let cache = PageCache::new(
            Arc::new(seeded_io(8, 64)),
            PageCacheOptions {
                page_size: 64,
                cache_pages: 2,
            },
            tracer.clone(),
        )
        .unwrap();
        for page in 0..8 {
            assert_eq!(cache.read_page(PageId(page)).unwrap()[0], page as u8);
        }
        let totals = tracer.totals();
        assert_eq!(totals.faults, 8);
        assert_eq!(totals.evictions, 6);
        assert_eq!(cache.stats().evictions, 6);
    }

    #[test]
    fn failed_read_is_traced_and_propagated() {
        let tracer = Arc::new(CountingTracer::new());
        let io = FaultyIo::new(seeded_io(4, 64), 64);
        io.fail_region(1);
        let cache = PageCache::new(
            Arc::new(io),
            PageCacheOptions {
                page_size: 64,
                cache_pages: 2,
            },
            tracer.clone(),
        )
        .unwrap();
        assert!(cache.read_page(PageId(1)).is_err());
        assert!(cache.read_page(PageId(0)).is_ok());
        let totals = tracer.totals();
        assert_eq!(totals.faults, 2);
        assert_eq!(totals.failed_faults, 1);
        assert_eq!(cache.stats().failed_reads, 1);
    }

    #[test]
    fn rejects_empty_cache() {
        let err = PageCache::new(
            Arc::new(MemIo::new()),
            PageCacheOptions {
                page_size: 64,
                cache_pages: 0,
            },
            crate::primitives::pager::null_tracer(),
        );
        assert!(err.is_err());
    }
}
