//! Bounded response cache with TTL expiry and LRU eviction
//!
//! Entries live in a single map guarded by one lock together with the statistics, so
//! every operation observes a consistent view. Recency is tracked with a monotonic
//! access sequence; the entry with the lowest sequence is evicted first.

use super::entry::CacheEntry;
use super::keys::GlobPattern;
use super::memoize::{CachedFn, WrapOptions};
use crate::error::{ResilienceError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of entries; zero disables caching
    pub max_entries: usize,

    /// TTL applied by [`ResponseCache::set`]; `None` means entries never expire
    #[serde(with = "humantime_serde")]
    pub default_ttl: Option<Duration>,

    /// Interval of the background sweep
    #[serde(with = "humantime_serde")]
    pub cleanup_interval: Duration,

    /// Enable automatic background cleanup
    pub auto_cleanup: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            default_ttl: Some(Duration::from_secs(300)), // 5 minutes
            cleanup_interval: Duration::from_secs(60),   // 1 minute
            auto_cleanup: true,
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<()> {
        if self.auto_cleanup && self.cleanup_interval.is_zero() {
            return Err(ResilienceError::config(
                "cache.cleanup_interval must be greater than zero when auto_cleanup is enabled",
            ));
        }
        Ok(())
    }
}

/// Cache statistics for monitoring
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Lookups served from the cache
    pub hits: u64,
    /// Lookups that found nothing or an expired entry
    pub misses: u64,
    /// Accepted writes
    pub sets: u64,
    /// Explicit deletions, pattern invalidations included
    pub deletes: u64,
    /// Entries dropped to make room
    pub evictions: u64,
    /// Entries dropped because their TTL ran out
    pub expirations: u64,
    /// Current number of stored entries
    pub size: usize,
    /// Configured capacity
    pub max_size: usize,
    /// Hit percentage formatted as `NN.NN%`
    pub hit_rate: String,
}

impl CacheStats {
    /// Calculate hit ratio in `[0, 1]`
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: u64,
    misses: u64,
    sets: u64,
    deletes: u64,
    evictions: u64,
    expirations: u64,
}

#[derive(Debug)]
struct CacheStore<V> {
    entries: HashMap<String, CacheEntry<V>>,
    counters: Counters,
    access_seq: u64,
}

impl<V> CacheStore<V> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            counters: Counters::default(),
            access_seq: 0,
        }
    }

    fn next_seq(&mut self) -> u64 {
        self.access_seq += 1;
        self.access_seq
    }

    /// Remove `key` if present and expired, returning whether it was removed
    fn remove_if_expired(&mut self, key: &str, now: Instant) -> bool {
        let expired = self
            .entries
            .get(key)
            .is_some_and(|entry| entry.is_expired_at(now));
        if expired {
            self.entries.remove(key);
            self.counters.expirations += 1;
            trace!(key, "Removed expired cache entry");
        }
        expired
    }

    fn purge_expired(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired_at(now));
        let removed = before - self.entries.len();
        self.counters.expirations += removed as u64;
        removed
    }

    fn evict_lru_entry(&mut self) {
        let lru_key = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.access_seq)
            .map(|(key, _)| key.clone());

        if let Some(key) = lru_key {
            self.entries.remove(&key);
            self.counters.evictions += 1;
            debug!(key = %key, "Evicted LRU entry due to size limit");
        }
    }
}

/// Generic response cache keyed by strings
///
/// Share it behind an `Arc`; [`wrap`](Self::wrap) requires one. Dropping the last handle
/// stops the background sweep.
#[derive(Debug)]
pub struct ResponseCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    store: Arc<Mutex<CacheStore<V>>>,
    config: CacheConfig,
    shutdown: CancellationToken,
}

impl<V> ResponseCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create a new response cache
    ///
    /// With `auto_cleanup` the sweep task is spawned on the current tokio runtime; outside
    /// a runtime the cache still works and only on-demand [`cleanup`](Self::cleanup) runs.
    pub fn new(config: CacheConfig) -> Result<Self> {
        config.validate()?;
        let cache = Self {
            store: Arc::new(Mutex::new(CacheStore::new())),
            config,
            shutdown: CancellationToken::new(),
        };

        if cache.config.auto_cleanup {
            cache.start_background_cleanup();
        }

        Ok(cache)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Get a value from the cache
    pub async fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut store = self.store.lock().await;

        if store.remove_if_expired(key, now) {
            store.counters.misses += 1;
            return None;
        }

        let seq = store.next_seq();
        let value = store
            .entries
            .get_mut(key)
            .map(|entry| entry.access(now, seq).clone());

        match value {
            Some(value) => {
                store.counters.hits += 1;
                trace!(key, "Cache hit");
                Some(value)
            }
            None => {
                store.counters.misses += 1;
                trace!(key, "Cache miss");
                None
            }
        }
    }

    /// Put a value into the cache with the default TTL
    pub async fn set(&self, key: impl Into<String>, value: V) -> bool {
        self.set_with_ttl(key, value, self.config.default_ttl).await
    }

    /// Put a value into the cache with a custom TTL; `None` or zero never expires
    ///
    /// Returns `false` only for a zero-capacity cache.
    pub async fn set_with_ttl(
        &self,
        key: impl Into<String>,
        value: V,
        ttl: Option<Duration>,
    ) -> bool {
        let key = key.into();
        if self.config.max_entries == 0 {
            debug!(key = %key, "Cache has zero capacity, rejecting set");
            return false;
        }

        let now = Instant::now();
        let mut store = self.store.lock().await;

        if !store.entries.contains_key(&key) && store.entries.len() >= self.config.max_entries {
            store.evict_lru_entry();
        }

        let seq = store.next_seq();
        store.entries.insert(key, CacheEntry::new(value, ttl, now, seq));
        store.counters.sets += 1;

        trace!("Cache entry added, total entries: {}", store.entries.len());
        true
    }

    /// Remove a key, returning whether it existed
    pub async fn delete(&self, key: &str) -> bool {
        let mut store = self.store.lock().await;
        let existed = store.entries.remove(key).is_some();
        if existed {
            store.counters.deletes += 1;
        }
        existed
    }

    /// Check whether a live entry exists for `key`
    ///
    /// Does not refresh recency or touch hit/miss counters. An expired entry found here is
    /// removed and counted as an expiration.
    pub async fn has(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut store = self.store.lock().await;
        if store.remove_if_expired(key, now) {
            return false;
        }
        store.entries.contains_key(key)
    }

    /// Remove every key matching a glob pattern, returning the number removed
    pub async fn invalidate_pattern(&self, pattern: &str) -> Result<usize> {
        let glob = GlobPattern::new(pattern)?;
        let mut store = self.store.lock().await;

        let before = store.entries.len();
        store.entries.retain(|key, _| !glob.is_match(key));
        let removed = before - store.entries.len();
        store.counters.deletes += removed as u64;

        debug!(pattern, removed, "Invalidated cache entries by pattern");
        Ok(removed)
    }

    /// Memoize `operation` through this cache
    ///
    /// See [`CachedFn::call`] for the lookup rules.
    pub fn wrap<A, F, Fut>(
        self: &Arc<Self>,
        prefix: impl Into<String>,
        operation: F,
        options: WrapOptions<A>,
    ) -> CachedFn<A, V, F>
    where
        A: Serialize + 'static,
        F: Fn(A) -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        CachedFn::new(self.clone(), prefix.into(), operation, options)
    }

    /// Memoize `operation`, deriving every key suffix with `key_generator`
    ///
    /// Unlike [`wrap`](Self::wrap) the arguments need no JSON form. A generator set in
    /// `options` is replaced by `key_generator`.
    pub fn wrap_keyed<A, F, Fut, G>(
        self: &Arc<Self>,
        prefix: impl Into<String>,
        operation: F,
        key_generator: G,
        options: WrapOptions<A>,
    ) -> CachedFn<A, V, F>
    where
        A: 'static,
        F: Fn(A) -> Fut,
        Fut: Future<Output = Result<V>>,
        G: Fn(&A) -> String + Send + Sync + 'static,
    {
        CachedFn::with_key_generator(
            self.clone(),
            prefix.into(),
            operation,
            options,
            Arc::new(key_generator),
        )
    }

    /// Get cache statistics
    pub async fn stats(&self) -> CacheStats {
        let store = self.store.lock().await;
        let counters = &store.counters;
        let lookups = counters.hits + counters.misses;
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            counters.hits as f64 / lookups as f64 * 100.0
        };

        CacheStats {
            hits: counters.hits,
            misses: counters.misses,
            sets: counters.sets,
            deletes: counters.deletes,
            evictions: counters.evictions,
            expirations: counters.expirations,
            size: store.entries.len(),
            max_size: self.config.max_entries,
            hit_rate: format!("{:.2}%", hit_rate),
        }
    }

    /// Manually trigger cleanup of expired entries
    pub async fn cleanup(&self) -> usize {
        let removed = self.store.lock().await.purge_expired(Instant::now());
        if removed > 0 {
            debug!("Cache cleanup: removed {} expired entries", removed);
        }
        removed
    }

    /// Clear all entries from the cache; statistics are kept
    pub async fn clear(&self) {
        self.store.lock().await.entries.clear();
        debug!("Cache cleared");
    }

    /// Get all live keys, sorted
    pub async fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        let store = self.store.lock().await;
        let mut keys: Vec<_> = store
            .entries
            .iter()
            .filter(|(_, entry)| !entry.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Number of stored entries, expired ones not yet swept included
    pub async fn len(&self) -> usize {
        self.store.lock().await.entries.len()
    }

    /// Check if cache is empty
    pub async fn is_empty(&self) -> bool {
        self.store.lock().await.entries.is_empty()
    }

    /// Stop the background sweep; calling it again has no effect
    pub fn stop(&self) {
        if !self.shutdown.is_cancelled() {
            self.shutdown.cancel();
            debug!("Cache background cleanup stopped");
        }
    }

    /// Start background cleanup task
    fn start_background_cleanup(&self) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No tokio runtime available, cache background cleanup disabled");
            return;
        };

        let store: Weak<Mutex<CacheStore<V>>> = Arc::downgrade(&self.store);
        let shutdown = self.shutdown.clone();
        let period = self.config.cleanup_interval;

        runtime.spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        let Some(store) = store.upgrade() else { break };
                        let removed = store.lock().await.purge_expired(Instant::now());
                        if removed > 0 {
                            trace!("Background cleanup: removed {} expired entries", removed);
                        }
                    }
                }
            }
        });
    }
}

impl<V> Drop for ResponseCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        // Cancel background cleanup task
        self.shutdown.cancel();
    }
}
