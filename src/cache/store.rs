//! Durable tier abstraction.
//!
//! The durable tier maps string keys to serialized payloads with an absolute
//! expiry. It backs cold starts and lets several processes share entries.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Durable tier fault: I/O, payload encoding or a backend-specific failure.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store backend error: {0}")]
    Backend(String),
}

/// A payload as held by the durable tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEntry {
    /// Opaque serialized value (JSON)
    pub value: String,
    /// When the entry expires
    pub expires_at: DateTime<Utc>,
}

/// Keyed store with expiry, used as the second cache tier.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Fetch the raw entry for `key`, expired or not.
    async fn find(&self, key: &str) -> Result<Option<StoredEntry>, StoreError>;

    /// Insert or replace the entry for `key`.
    async fn upsert(&self, key: &str, entry: StoredEntry) -> Result<(), StoreError>;

    /// Remove `key`. Removing an absent key succeeds.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Remove every entry expired at `now`. Returns how many were removed.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError>;
}

/// In-process durable tier.
///
/// Survives nothing beyond the process, but keeps the two-tier topology intact
/// for single-process deployments and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, StoredEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn find(&self, key: &str) -> Result<Option<StoredEntry>, StoreError> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn upsert(&self, key: &str, entry: StoredEntry) -> Result<(), StoreError> {
        self.entries.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| !crate::clock::is_expired(entry.expires_at, now));
        Ok(before.saturating_sub(self.entries.len()))
    }
}
