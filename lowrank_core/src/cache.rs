//! Factorization caching for repeated precomputation.
//!
//! The cache is an ordinary value owned by the caller: it is created with a
//! capacity and time-to-live, passed by reference to
//! [`precompute`](crate::precompute::precompute), and dropped or cleared
//! whenever the caller decides its contents are no longer valid.

use std::hash::Hash;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;

use crate::config::CacheSettings;
use crate::decompose::Preset;

/// Identity of one cached factorization.
///
/// `identity` is chosen by the caller (a file name plus size, a content hash,
/// ...). Rank and preset are part of the key because they change the result.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub identity: String,
    pub rank: usize,
    pub preset: Preset,
}

impl CacheKey {
    pub fn new(identity: impl Into<String>, rank: usize, preset: Preset) -> Self {
        Self {
            identity: identity.into(),
            rank,
            preset,
        }
    }
}

/// Capacity-bounded LRU cache whose entries also expire after a fixed TTL.
///
/// # Memory
///
/// Values are usually `Arc`s, so an entry costs the key plus one pointer;
/// the factors themselves live as long as any caller still holds them.
pub struct FactorCache<V, K = CacheKey>
where
    K: Hash + Eq,
{
    entries: LruCache<K, (Instant, V)>,
    ttl: Duration,
    hits: u64,
    misses: u64,
}

impl<V: Clone, K: Hash + Eq> FactorCache<V, K> {
    /// Create a cache holding at most `capacity` entries (at least one).
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: LruCache::new(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)),
            ttl,
            hits: 0,
            misses: 0,
        }
    }

    pub fn from_settings(settings: &CacheSettings) -> Self {
        Self::new(settings.capacity, settings.ttl)
    }

    /// Look up `key`, dropping the entry if it has outlived the TTL.
    pub fn get(&mut self, key: &K) -> Option<V> {
        let expired = match self.entries.get(key) {
            Some((inserted, value)) if inserted.elapsed() < self.ttl => {
                self.hits += 1;
                return Some(value.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.pop(key);
        }
        self.misses += 1;
        None
    }

    /// Insert or replace; the least recently used entry makes room.
    pub fn set(&mut self, key: K, value: V) {
        self.entries.put(key, (Instant::now(), value));
    }

    pub fn evict(&mut self, key: &K) -> Option<V> {
        self.entries.pop(key).map(|(_, value)| value)
    }

    /// Drop every expired entry and return how many were removed.
    pub fn purge_expired(&mut self) -> usize
    where
        K: Clone,
    {
        let ttl = self.ttl;
        let expired: Vec<K> = self
            .entries
            .iter()
            .filter(|(_, (inserted, _))| inserted.elapsed() >= ttl)
            .map(|(key, _)| key)
            .cloned()
            .collect();
        for key in &expired {
            self.entries.pop(key);
        }
        expired.len()
    }

    /// Clear the cache and reset statistics
    pub fn clear(&mut self) {
        self.entries.clear();
        self.hits = 0;
        self.misses = 0;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    /// hit/(hit+miss), or 0 before any lookup
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(identity: &str, rank: usize) -> CacheKey {
        CacheKey::new(identity, rank, Preset::Balanced)
    }

    #[test]
    fn test_hit_and_miss() {
        let mut cache: FactorCache<u32> = FactorCache::new(4, Duration::from_secs(600));
        assert_eq!(cache.get(&key("a.png", 30)), None);
        cache.set(key("a.png", 30), 7);
        assert_eq!(cache.get(&key("a.png", 30)), Some(7));
        assert_eq!(cache.get(&key("a.png", 31)), None);
        assert_eq!(cache.hits(), 1);
        assert_eq!(cache.misses(), 2);
        assert!((cache.hit_rate() - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_lru_eviction() {
        let mut cache: FactorCache<u32> = FactorCache::new(2, Duration::from_secs(600));
        cache.set(key("a", 1), 1);
        cache.set(key("b", 1), 2);
        assert_eq!(cache.get(&key("a", 1)), Some(1));
        cache.set(key("c", 1), 3);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&key("b", 1)), None);
        assert_eq!(cache.get(&key("a", 1)), Some(1));
    }

    #[test]
    fn test_ttl_expiry() {
        let mut cache: FactorCache<u32> = FactorCache::new(4, Duration::ZERO);
        cache.set(key("a", 1), 1);
        cache.set(key("b", 1), 2);
        assert_eq!(cache.get(&key("a", 1)), None);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.purge_expired(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_evict_and_clear() {
        let mut cache: FactorCache<u32> =
            FactorCache::from_settings(&CacheSettings::default());
        assert_eq!(cache.capacity(), 5);
        cache.set(key("a", 1), 1);
        assert_eq!(cache.evict(&key("a", 1)), Some(1));
        assert_eq!(cache.evict(&key("a", 1)), None);
        cache.set(key("b", 1), 2);
        cache.get(&key("b", 1));
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.hits(), 0);
    }
}
