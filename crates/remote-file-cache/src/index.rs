//! TTL-bearing key-to-path index
//!
//! Maps a cache key to the relative path of the file it refers to. Each entry
//! carries its own TTL and may be evicted autonomously once it elapses, so an
//! absent key means "never set" or "expired" — callers cannot and must not
//! distinguish the two.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::future::Cache;
use moka::Expiry;

/// Key-to-relative-path store with per-entry TTL
#[async_trait]
pub trait CacheIndex: Send + Sync {
    /// Relative path stored for a key, or `None` if absent or expired
    async fn get(&self, key: &str) -> Option<String>;

    /// Insert or refresh an entry with a fresh TTL
    async fn set(&self, key: String, relative_path: String, ttl: Duration);

    /// Remove an entry; removing an absent key is a no-op
    async fn remove(&self, key: &str);

    /// Clear all entries
    async fn flush(&self);
}

#[derive(Debug, Clone)]
struct IndexEntry {
    relative_path: String,
    ttl: Duration,
}

/// Expires each entry after its own TTL; a re-set restarts the clock
struct PerEntryTtl;

impl Expiry<String, IndexEntry> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        entry: &IndexEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(entry.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        entry: &IndexEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(entry.ttl)
    }
}

/// In-memory index backed by a moka cache honoring each entry's TTL
pub struct MemoryIndex {
    entries: Cache<String, IndexEntry>,
}

impl MemoryIndex {
    pub fn new(max_capacity: u64) -> Self {
        let entries = Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(PerEntryTtl)
            .build();
        Self { entries }
    }
}

impl Default for MemoryIndex {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl CacheIndex for MemoryIndex {
    async fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).await.map(|e| e.relative_path)
    }

    async fn set(&self, key: String, relative_path: String, ttl: Duration) {
        self.entries
            .insert(key, IndexEntry { relative_path, ttl })
            .await;
    }

    async fn remove(&self, key: &str) {
        self.entries.invalidate(key).await;
    }

    async fn flush(&self) {
        self.entries.invalidate_all();
    }
}
