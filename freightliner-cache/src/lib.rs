//! In-memory cache for registry metadata: manifests, blob existence/location, and tag
//! lists, each with its own capacity, TTL, and LRU eviction, governed by a shared memory
//! ceiling.

mod cache;
mod entry;
mod lru;
mod metrics;
mod values;

pub use cache::{CacheBuilder, CacheConfig, HighPerformanceCache};
pub use entry::CacheEntry;
pub use lru::{LruMap, PutOutcome};
pub use metrics::{CacheMetrics, SpaceMetrics};
pub use values::{CachedBlob, CachedManifest, CachedTagList, LogicalSize};
