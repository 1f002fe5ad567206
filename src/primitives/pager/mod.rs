#![forbid(unsafe_code)]

mod cache;
mod frame;
mod tracer;

pub use cache::{PageCache, PageCacheOptions, PageCacheStats, DEFAULT_PAGE_SIZE};
pub use tracer::{
    null_tracer, CountingTracer, EvictionEvent, EvictionRecord, FaultRecord, NullTracer,
    PageCacheTracer, PageFaultEvent, TraceError, TracerSnapshot,
};
