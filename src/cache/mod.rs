//! Two-tier caching: a bounded memory cache in front of a durable store.

mod entry;
mod file_store;
mod memory;
mod stats;
mod store;
mod tiered;

pub use entry::CacheEntry;
pub use file_store::JsonFileStore;
pub use memory::MemoryCache;
pub use stats::{CacheStats, StatsSnapshot};
pub use store::{DurableStore, MemoryStore, StoreError, StoredEntry};
pub use tiered::{PurgeReport, TieredCache};
