//! Time-bounded LRU caching
//!
//! [`ResponseCache`] stores cloned values under string keys with an optional TTL and
//! evicts the least recently used entry when full. [`ResponseCache::wrap`] turns an
//! async operation into a memoized [`CachedFn`].

pub mod entry;
pub mod keys;
pub mod memoize;
pub mod response_cache;

pub use entry::CacheEntry;
pub use keys::{create_cache_key, GlobPattern};
pub use memoize::{CachedFn, KeyGenerator, WrapOptions};
pub use response_cache::{CacheConfig, CacheStats, ResponseCache};
