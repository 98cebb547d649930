//! TTL-bound local caching for remote files
//!
//! Fetches URL-addressed files onto local storage, keyed deterministically by
//! URL, with per-entry TTL expiry and self-healing when the metadata index
//! and the filesystem disagree. [`CacheManager`] orchestrates lookup, fetch,
//! and index updates over two pluggable collaborators: a [`CacheIndex`]
//! (default: in-memory with TTL eviction) and a [`FileStore`] (default: local
//! disk over HTTP). [`preload_urls`] drains URL batches through the same
//! entry point with a bounded worker pool.

mod error;
mod index;
mod manager;
mod options;
mod preload;
mod store;
mod types;

pub use error::{CacheError, Result};
pub use index::{CacheIndex, MemoryIndex};
pub use manager::{is_cacheable, CacheManager};
pub use options::{CacheConfig, CacheOptions, DEFAULT_TTL_SECS};
pub use preload::{preload_urls, preload_urls_with_cancel, PreloadFailure, PreloadReport};
pub use store::{DiskStore, FileStore};
pub use types::{CachedFile, DirInfo};
pub use url_cache_key::QueryPolicy;
