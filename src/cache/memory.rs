//! Bounded in-memory cache with per-entry expiry and LRU eviction.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

use super::entry::CacheEntry;
use crate::clock::{Clock, SystemClock};

/// A slot in the cache, tagged with the tick of its last use.
struct Slot<V> {
    entry: CacheEntry<V>,
    last_used: u64,
}

struct Inner<V> {
    entries: HashMap<String, Slot<V>>,
    /// Last-use tick -> key. The first element is the least recently used.
    recency: BTreeMap<u64, String>,
    tick: u64,
}

impl<V> Inner<V> {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn touch(&mut self, key: &str) {
        let tick = self.next_tick();
        if let Some(slot) = self.entries.get_mut(key) {
            self.recency.remove(&slot.last_used);
            slot.last_used = tick;
            self.recency.insert(tick, key.to_string());
        }
    }

    fn remove(&mut self, key: &str) -> Option<Slot<V>> {
        let slot = self.entries.remove(key)?;
        self.recency.remove(&slot.last_used);
        Some(slot)
    }

    fn pop_least_recent(&mut self) -> Option<String> {
        let (_, key) = self.recency.pop_first()?;
        self.entries.remove(&key);
        Some(key)
    }
}

/// Fixed-capacity, recency-ordered cache.
///
/// Each call takes a single lock, so `get`, `set` and `delete` are atomic with
/// respect to each other. Reads count as uses: a `get` hit protects the key
/// from the next eviction.
pub struct MemoryCache<V> {
    capacity: usize,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner<V>>,
}

impl<V: Clone> MemoryCache<V> {
    /// Create a cache holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        Self::with_clock(capacity, Arc::new(SystemClock))
    }

    /// Create a cache that reads time from `clock`.
    pub fn with_clock(capacity: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            capacity: capacity.max(1),
            clock,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                recency: BTreeMap::new(),
                tick: 0,
            }),
        }
    }

    /// Look up a live entry, refreshing its recency.
    ///
    /// An expired entry is removed and reported as absent.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();

        let expired = match inner.entries.get(key) {
            None => return None,
            Some(slot) => slot.entry.is_expired(now),
        };

        if expired {
            trace!(key = %key, "Dropping expired memory entry");
            inner.remove(key);
            return None;
        }

        inner.touch(key);
        inner.entries.get(key).map(|slot| slot.entry.value.clone())
    }

    /// Insert or replace `key` with a relative TTL.
    ///
    /// Returns the key evicted to make room, if any.
    pub fn set(&self, key: &str, value: V, ttl: Duration) -> Option<String> {
        let entry = CacheEntry::new(value, ttl, self.clock.now());
        self.insert_entry(key, entry)
    }

    /// Insert or replace `key` with an absolute expiry.
    pub fn insert_until(&self, key: &str, value: V, expires_at: DateTime<Utc>) -> Option<String> {
        self.insert_entry(key, CacheEntry::until(value, expires_at))
    }

    fn insert_entry(&self, key: &str, entry: CacheEntry<V>) -> Option<String> {
        let mut inner = self.inner.lock();

        inner.remove(key);

        let evicted = if inner.entries.len() >= self.capacity {
            inner.pop_least_recent()
        } else {
            None
        };
        if let Some(ref evicted) = evicted {
            trace!(key = %evicted, "Evicted least recently used entry");
        }

        let tick = inner.next_tick();
        inner.recency.insert(tick, key.to_string());
        inner.entries.insert(
            key.to_string(),
            Slot {
                entry,
                last_used: tick,
            },
        );

        evicted
    }

    /// Remove `key` if present.
    pub fn delete(&self, key: &str) {
        self.inner.lock().remove(key);
    }

    /// Whether a live entry exists, without touching its recency.
    pub fn contains(&self, key: &str) -> bool {
        let now = self.clock.now();
        self.inner
            .lock()
            .entries
            .get(key)
            .map(|slot| !slot.entry.is_expired(now))
            .unwrap_or(false)
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut inner = self.inner.lock();

        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, slot)| slot.entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            inner.remove(key);
        }
        expired.len()
    }

    /// Number of stored entries, including expired ones not yet observed.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn cache_with_clock(capacity: usize) -> (MemoryCache<String>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let cache = MemoryCache::with_clock(capacity, clock.clone());
        (cache, clock)
    }

    #[test]
    fn test_set_then_get() {
        let (cache, _) = cache_with_clock(4);
        cache.set("price:btc", "64000".to_string(), Duration::from_secs(60));
        assert_eq!(cache.get("price:btc"), Some("64000".to_string()));
    }

    #[test]
    fn test_get_after_ttl_is_absent_and_removed() {
        let (cache, clock) = cache_with_clock(4);
        cache.set("price:btc", "64000".to_string(), Duration::from_secs(60));

        clock.advance(Duration::from_secs(61));

        assert_eq!(cache.get("price:btc"), None);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_overwrite_refreshes_value_and_expiry() {
        let (cache, clock) = cache_with_clock(4);
        cache.set("k", "old".to_string(), Duration::from_secs(10));
        clock.advance(Duration::from_secs(5));
        cache.set("k", "new".to_string(), Duration::from_secs(10));
        clock.advance(Duration::from_secs(7));

        assert_eq!(cache.get("k"), Some("new".to_string()));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_eviction_removes_least_recently_used() {
        let (cache, _) = cache_with_clock(3);
        let ttl = Duration::from_secs(60);
        cache.set("a", "1".to_string(), ttl);
        cache.set("b", "2".to_string(), ttl);
        cache.set("c", "3".to_string(), ttl);

        let evicted = cache.set("d", "4".to_string(), ttl);

        assert_eq!(evicted.as_deref(), Some("a"));
        assert_eq!(cache.len(), 3);
        assert!(!cache.contains("a"));
    }

    #[test]
    fn test_get_protects_key_from_eviction() {
        let (cache, _) = cache_with_clock(3);
        let ttl = Duration::from_secs(60);
        cache.set("a", "1".to_string(), ttl);
        cache.set("b", "2".to_string(), ttl);
        cache.set("c", "3".to_string(), ttl);

        assert!(cache.get("a").is_some());
        let evicted = cache.set("d", "4".to_string(), ttl);

        assert_eq!(evicted.as_deref(), Some("b"));
        assert!(cache.contains("a"));
        assert!(cache.contains("c"));
        assert!(cache.contains("d"));
    }

    #[test]
    fn test_overwrite_does_not_evict() {
        let (cache, _) = cache_with_clock(2);
        let ttl = Duration::from_secs(60);
        cache.set("a", "1".to_string(), ttl);
        cache.set("b", "2".to_string(), ttl);

        assert_eq!(cache.set("a", "3".to_string(), ttl), None);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_delete_absent_is_noop() {
        let (cache, _) = cache_with_clock(2);
        cache.delete("missing");
        cache.set("a", "1".to_string(), Duration::from_secs(1));
        cache.delete("a");
        assert!(cache.is_empty());
    }

    #[test]
    fn test_insert_until_honors_absolute_expiry() {
        let (cache, clock) = cache_with_clock(2);
        let expires = clock.now() + chrono::Duration::seconds(3);
        cache.insert_until("a", "1".to_string(), expires);

        clock.advance(Duration::from_secs(2));
        assert!(cache.get("a").is_some());
        clock.advance(Duration::from_secs(1));
        assert!(cache.get("a").is_none());
    }

    #[test]
    fn test_purge_expired() {
        let (cache, clock) = cache_with_clock(4);
        cache.set("short", "1".to_string(), Duration::from_secs(1));
        cache.set("long", "2".to_string(), Duration::from_secs(100));

        clock.advance(Duration::from_secs(2));

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.contains("long"));
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let cache: MemoryCache<u32> = MemoryCache::new(0);
        assert_eq!(cache.capacity(), 1);
        cache.set("a", 1, Duration::from_secs(5));
        cache.set("b", 2, Duration::from_secs(5));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("b"), Some(2));
    }
}
