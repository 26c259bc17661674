//! JSON file backed durable tier.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::store::{DurableStore, StoreError, StoredEntry};

/// Durable tier kept in a single JSON document.
///
/// Every operation reads the document from disk, so entries written by other
/// processes sharing the file are visible. Mutations are read-modify-write
/// under a process-local lock and land via temp file + rename, so a reader
/// never sees a half-written document. Concurrent writers in different
/// processes can lose each other's updates.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    /// Open the store at `path`, validating any existing document.
    ///
    /// A missing file is an empty store; a corrupt one is an error.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let store = Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        };

        let entries = store.load().await?;
        info!(
            path = %store.path.display(),
            entries = entries.len(),
            "Opened JSON file store"
        );

        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<HashMap<String, StoredEntry>, StoreError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) if contents.trim().is_empty() => Ok(HashMap::new()),
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, entries: &HashMap<String, StoredEntry>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let json = serde_json::to_vec(entries)?;
        let tmp = self
            .path
            .with_extension(format!("tmp-{}", uuid::Uuid::new_v4()));

        tokio::fs::write(&tmp, json).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }
}

#[async_trait]
impl DurableStore for JsonFileStore {
    async fn find(&self, key: &str) -> Result<Option<StoredEntry>, StoreError> {
        let mut entries = self.load().await?;
        Ok(entries.remove(key))
    }

    async fn upsert(&self, key: &str, entry: StoredEntry) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.load().await?;
        entries.insert(key.to_string(), entry);
        self.save(&entries).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.load().await?;
        if entries.remove(key).is_some() {
            self.save(&entries).await?;
        }
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.load().await?;
        let before = entries.len();
        entries.retain(|_, entry| !crate::clock::is_expired(entry.expires_at, now));

        let removed = before - entries.len();
        if removed > 0 {
            self.save(&entries).await?;
            debug!(path = %self.path.display(), removed, "Purged expired file store entries");
        }
        Ok(removed)
    }
}
