//! Freshness cache for price lookups
//!
//! Entries are fresh while `age < ttl`. Expired entries are kept so they
//! can serve as a degraded fallback when a live refresh fails; they are
//! only returned by [`PriceCache::get_including_expired`].

use parking_lot::RwLock;
use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;
use tokio::time::Instant;

/// Cached value with its insertion time
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub data: V,
    pub stored_at: Instant,
}

/// Lookup result distinguishing fresh hits from stale fallbacks
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup<V> {
    Fresh(V),
    Stale(V),
    Miss,
}

/// Cache statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceCacheStats {
    /// Total entries in cache
    pub total_entries: usize,
    /// Valid (non-expired) entries
    pub fresh_entries: usize,
    /// Expired entries retained for fallback
    pub stale_entries: usize,
}

/// Keyed cache with a fixed freshness window
pub struct PriceCache<K, V> {
    entries: RwLock<HashMap<K, CacheEntry<V>>>,
    ttl: Duration,
}

impl<K, V> PriceCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fresh value only
    pub fn get(&self, key: &K) -> Option<V> {
        match self.lookup(key) {
            CacheLookup::Fresh(v) => Some(v),
            _ => None,
        }
    }

    /// Fresh or expired value
    pub fn get_including_expired(&self, key: &K) -> Option<V> {
        match self.lookup(key) {
            CacheLookup::Fresh(v) | CacheLookup::Stale(v) => Some(v),
            CacheLookup::Miss => None,
        }
    }

    pub fn lookup(&self, key: &K) -> CacheLookup<V> {
        let entries = self.entries.read();
        match entries.get(key) {
            Some(entry) if entry.stored_at.elapsed() < self.ttl => {
                CacheLookup::Fresh(entry.data.clone())
            }
            Some(entry) => CacheLookup::Stale(entry.data.clone()),
            None => CacheLookup::Miss,
        }
    }

    pub fn insert(&self, key: K, data: V) {
        self.entries.write().insert(
            key,
            CacheEntry {
                data,
                stored_at: Instant::now(),
            },
        );
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Drop expired entries
    pub fn prune_expired(&self) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| entry.stored_at.elapsed() < self.ttl);
        before - entries.len()
    }

    pub fn stats(&self) -> PriceCacheStats {
        let entries = self.entries.read();
        let fresh = entries
            .values()
            .filter(|entry| entry.stored_at.elapsed() < self.ttl)
            .count();

        PriceCacheStats {
            total_entries: entries.len(),
            fresh_entries: fresh,
            stale_entries: entries.len() - fresh,
        }
    }
}
