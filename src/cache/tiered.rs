//! Two-tier cache facade.
//!
//! Reads go memory first, then the durable store; a durable hit repopulates
//! memory with the entry's remaining lifetime. Writes land in memory
//! immediately and are persisted to the durable store in the background.
//!
//! Durable-tier faults never reach the caller. A failed read is a miss, a
//! failed write is a log line. The tiers are not transactionally linked, so
//! brief disagreement between them is expected.
//!
//! Durable mutations for a key are applied in the order they were issued.
//! Each `set`/`delete` stamps the key with a sequence number when it touches
//! memory; a background write that finds a newer stamp has been superseded
//! and is dropped.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rand::Rng;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::memory::MemoryCache;
use super::stats::{CacheStats, StatsSnapshot};
use super::store::{DurableStore, StoredEntry};
use crate::clock::{self, Clock, SystemClock};
use crate::config::CacheConfig;

/// Entries removed by one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub memory: usize,
    pub durable: usize,
}

enum DurableOp {
    Upsert(StoredEntry),
    Delete,
}

struct TieredCacheInner {
    memory: MemoryCache<Value>,
    store: Arc<dyn DurableStore>,
    clock: Arc<dyn Clock>,
    stats: CacheStats,
    default_ttl: Duration,
    /// Key -> sequence number of the newest durable mutation not yet applied
    pending: DashMap<String, u64>,
    next_seq: AtomicU64,
    /// Serializes durable mutations so the stamp check and the write are atomic
    write_lock: Mutex<()>,
}

impl TieredCacheInner {
    fn insert_memory(&self, key: &str, value: Value, expires_at: DateTime<Utc>) {
        if self.memory.insert_until(key, value, expires_at).is_some() {
            self.stats.record_eviction();
        }
    }

    /// Apply `update_memory` and stamp `key` as the newest mutation, as one
    /// step with respect to other mutations of the same key.
    fn issue(&self, key: &str, update_memory: impl FnOnce()) -> u64 {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let mut stamp = self.pending.entry(key.to_string()).or_insert(seq);
        update_memory();
        *stamp = seq;
        seq
    }

    /// Write `op` to the durable store unless a newer mutation of `key` was issued.
    async fn apply_durable(&self, key: &str, seq: u64, op: DurableOp) {
        let _guard = self.write_lock.lock().await;

        let current = self.pending.get(key).map(|stamp| *stamp);
        if current != Some(seq) {
            trace!(key = %key, seq, "Durable write superseded");
            return;
        }

        let result = match op {
            DurableOp::Upsert(entry) => self.store.upsert(key, entry).await,
            DurableOp::Delete => self.store.delete(key).await,
        };
        if let Err(e) = result {
            warn!(key = %key, error = %e, "Durable store write failed");
            self.stats.record_store_fault();
        }

        self.pending.remove_if(key, |_, stamp| *stamp == seq);
    }

    /// Delete an entry observed expired, unless it was rewritten since.
    async fn remove_expired(&self, key: &str) {
        let _guard = self.write_lock.lock().await;
        if self.pending.contains_key(key) {
            return;
        }

        let result = match self.store.find(key).await {
            Ok(Some(stored)) if clock::is_expired(stored.expires_at, self.clock.now()) => {
                self.store.delete(key).await
            }
            Ok(_) => return,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => self.stats.record_expired_cleanup(),
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to delete expired durable entry");
                self.stats.record_store_fault();
            }
        }
    }
}

/// Memory cache backed by a durable store. Cheap to clone.
#[derive(Clone)]
pub struct TieredCache {
    inner: Arc<TieredCacheInner>,
}

impl TieredCache {
    /// Create a cache over `store` using the system clock.
    pub fn new(store: Arc<dyn DurableStore>, config: &CacheConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    /// Create a cache whose expiries are computed from `clock`.
    pub fn with_clock(
        store: Arc<dyn DurableStore>,
        config: &CacheConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(TieredCacheInner {
                memory: MemoryCache::with_clock(config.memory_capacity, Arc::clone(&clock)),
                store,
                clock,
                stats: CacheStats::new(),
                default_ttl: config.default_ttl(),
                pending: DashMap::new(),
                next_seq: AtomicU64::new(0),
                write_lock: Mutex::new(()),
            }),
        }
    }

    /// Look up `key` in memory, then in the durable store.
    ///
    /// Returns `None` for absent or expired entries, for payloads that do not
    /// decode into `T`, and for any durable-tier fault.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        if let Some(value) = self.inner.memory.get(key) {
            trace!(key = %key, "Cache hit memory");
            let decoded = self.decode(key, value);
            if decoded.is_some() {
                self.inner.stats.record_memory_hit();
            } else {
                self.inner.stats.record_miss();
            }
            return decoded;
        }

        trace!(key = %key, "Cache miss memory");

        let decoded = self.hydrate(key).await;
        if decoded.is_some() {
            self.inner.stats.record_durable_hit();
        } else {
            self.inner.stats.record_miss();
        }
        decoded
    }

    async fn hydrate<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let stored = match self.inner.store.find(key).await {
            Ok(Some(stored)) => stored,
            Ok(None) => {
                trace!(key = %key, "Cache miss durable");
                return None;
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Durable store read failed, treating as miss");
                self.inner.stats.record_store_fault();
                return None;
            }
        };

        if clock::is_expired(stored.expires_at, self.inner.clock.now()) {
            debug!(key = %key, expires_at = %stored.expires_at, "Removing expired durable entry");
            self.inner.remove_expired(key).await;
            return None;
        }

        let value: Value = match serde_json::from_str(&stored.value) {
            Ok(value) => value,
            Err(e) => {
                warn!(key = %key, error = %e, "Malformed durable payload, treating as miss");
                self.inner.stats.record_store_fault();
                return None;
            }
        };

        let decoded = self.decode(key, value.clone())?;

        debug!(key = %key, expires_at = %stored.expires_at, "Hydrated memory from durable store");
        self.inner.insert_memory(key, value, stored.expires_at);
        Some(decoded)
    }

    fn decode<T: DeserializeOwned>(&self, key: &str, value: Value) -> Option<T> {
        match serde_json::from_value(value) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                warn!(key = %key, error = %e, "Cached value does not match requested type");
                None
            }
        }
    }

    /// Store `value` under `key` for `ttl`.
    ///
    /// The memory tier is updated before this returns. The durable write runs
    /// as a background task and may not have completed when `set` returns;
    /// the returned handle can be awaited, or dropped. Its failure is only
    /// logged. A value that cannot be serialized is logged and not stored.
    /// A zero TTL stores nothing in memory and drops any previous entry.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Duration) -> JoinHandle<()> {
        let now = self.inner.clock.now();
        let expires_at = clock::expires_at(now, ttl);

        let value = match serde_json::to_value(value) {
            Ok(value) => value,
            Err(e) => {
                warn!(key = %key, error = %e, "Value is not serializable, skipping cache write");
                return tokio::spawn(async {});
            }
        };
        let payload = value.to_string();

        let seq = self.inner.issue(key, || {
            if clock::is_expired(expires_at, now) {
                self.inner.memory.delete(key);
            } else {
                self.inner.insert_memory(key, value, expires_at);
            }
        });

        let inner = Arc::clone(&self.inner);
        let key = key.to_string();
        tokio::spawn(async move {
            let entry = StoredEntry {
                value: payload,
                expires_at,
            };
            inner.apply_durable(&key, seq, DurableOp::Upsert(entry)).await;
        })
    }

    /// [`set`](Self::set) with the configured default TTL.
    pub fn set_default<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> JoinHandle<()> {
        self.set(key, value, self.inner.default_ttl)
    }

    /// Remove `key` from both tiers. Durable removal is best-effort.
    ///
    /// Supersedes any durable write of `key` still in flight.
    pub async fn delete(&self, key: &str) {
        let seq = self.inner.issue(key, || self.inner.memory.delete(key));
        self.inner.apply_durable(key, seq, DurableOp::Delete).await;
    }

    /// Return the cached value, or compute, cache and return it.
    ///
    /// Errors from `fetch` are returned unchanged and nothing is cached.
    /// Concurrent misses on the same key each run `fetch`.
    pub async fn get_or_fetch<T, E, F, Fut>(&self, key: &str, ttl: Duration, fetch: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(value) = self.get(key).await {
            return Ok(value);
        }

        let value = fetch().await?;
        // Durable write stays in the background.
        drop(self.set(key, &value, ttl));
        Ok(value)
    }

    /// Drop expired entries from both tiers.
    pub async fn purge_expired(&self) -> PurgeReport {
        let memory = self.inner.memory.purge_expired();
        let durable = match self.inner.store.purge_expired(self.inner.clock.now()).await {
            Ok(removed) => removed,
            Err(e) => {
                warn!(error = %e, "Durable store purge failed");
                self.inner.stats.record_store_fault();
                0
            }
        };
        PurgeReport { memory, durable }
    }

    /// Run [`purge_expired`](Self::purge_expired) every `interval`.
    ///
    /// The first sweep is delayed by up to a tenth of the interval so
    /// processes sharing a store do not sweep in lockstep.
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let interval = interval.max(Duration::from_millis(1));
        let cache = self.clone();
        let jitter_ms = interval.as_millis() as u64 / 10;
        let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms));

        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval + jitter;
            let mut ticker = tokio::time::interval_at(start, interval);
            loop {
                ticker.tick().await;
                let report = cache.purge_expired().await;
                debug!(
                    memory = report.memory,
                    durable = report.durable,
                    "Cache sweep finished"
                );
            }
        })
    }

    /// Counters since construction.
    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Entries currently held in memory.
    pub fn memory_len(&self) -> usize {
        self.inner.memory.len()
    }

    /// TTL used by [`set_default`](Self::set_default).
    pub fn default_ttl(&self) -> Duration {
        self.inner.default_ttl
    }
}
