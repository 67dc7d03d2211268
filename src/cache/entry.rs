use std::time::Duration;
use tokio::time::Instant;

/// Cache entry with TTL and access metadata
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    /// Cached value
    pub value: V,

    /// When the entry was created
    pub created_at: Instant,

    /// Expiry deadline, `None` for entries that never expire
    pub expires_at: Option<Instant>,

    /// Last accessed timestamp
    pub last_accessed: Instant,

    /// Number of reads served from this entry
    pub access_count: u64,

    /// Position in the cache-wide access order, lowest is least recently used
    pub(crate) access_seq: u64,
}

impl<V> CacheEntry<V> {
    /// Create a new cache entry; a zero TTL is treated as no TTL
    pub fn new(value: V, ttl: Option<Duration>, now: Instant, access_seq: u64) -> Self {
        let expires_at = ttl.filter(|ttl| !ttl.is_zero()).map(|ttl| now + ttl);
        Self {
            value,
            created_at: now,
            expires_at,
            last_accessed: now,
            access_count: 0,
            access_seq,
        }
    }

    /// Check if the entry has expired at `now`
    pub fn is_expired_at(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(deadline) if now >= deadline)
    }

    /// Check if the entry has expired
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    /// Get the remaining TTL, `None` if the entry never expires
    pub fn remaining_ttl(&self) -> Option<Duration> {
        self.expires_at
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Mark as accessed and return the value reference
    pub(crate) fn access(&mut self, now: Instant, access_seq: u64) -> &V {
        self.access_count += 1;
        self.last_accessed = now;
        self.access_seq = access_seq;
        &self.value
    }
}
