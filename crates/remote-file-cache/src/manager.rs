//! Cache orchestration: lookup, verify, fetch, index update
//!
//! `CacheManager` keeps the metadata index and the on-disk tree consistent.
//! Every index hit is verified against the filesystem before it is trusted;
//! a miss, an expired entry, or an index entry pointing at a missing file all
//! take the same fetch-and-store path, so external deletion of cached files
//! heals itself on the next request.
//!
//! Concurrent requests for the same URL are not deduplicated: both may fetch,
//! and the last index writer wins. Callers needing single-flight semantics
//! must coordinate themselves.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;
use url_cache_key::QueryPolicy;

use crate::error::{CacheError, Result};
use crate::index::{CacheIndex, MemoryIndex};
use crate::options::{CacheConfig, CacheOptions};
use crate::store::{DiskStore, FileStore};
use crate::types::{CachedFile, DirInfo};

/// Whether a URL is eligible for caching: a non-empty http(s) URL
pub fn is_cacheable(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Orchestrates URL-keyed caching over a metadata index and a file store
pub struct CacheManager<I: CacheIndex, S: FileStore> {
    config: CacheConfig,
    index: I,
    store: S,
}

impl CacheManager<MemoryIndex, DiskStore> {
    /// Manager with the in-memory index and disk store implied by `config`
    pub fn new(config: CacheConfig) -> Self {
        let store = DiskStore::with_tls(
            config.cache_location.clone(),
            config.allow_self_signed_ssl,
        );
        Self::with_collaborators(config, MemoryIndex::default(), store)
    }
}

impl<I: CacheIndex, S: FileStore> CacheManager<I, S> {
    /// Manager over explicitly supplied collaborators
    pub fn with_collaborators(config: CacheConfig, index: I, store: S) -> Self {
        Self {
            config,
            index,
            store,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Download a URL and cache the result, or return the already-cached file
    pub async fn download_and_cache_url(
        &self,
        url: &str,
        options: &CacheOptions,
    ) -> Result<CachedFile> {
        let config = self.config.effective(options);
        let headers = config.headers.clone();
        self.cache_url(url, &config, |fetch_url, dest| async move {
            self.store.download_file(&fetch_url, &dest, &headers).await
        })
        .await
    }

    /// Seed the cache for a URL from a local file instead of the network
    pub async fn seed_and_cache_url(
        &self,
        url: &str,
        seed_path: &Path,
        options: &CacheOptions,
    ) -> Result<CachedFile> {
        let config = self.config.effective(options);
        let seed = seed_path.to_path_buf();
        self.cache_url(url, &config, |_fetch_url, dest| async move {
            self.store.copy_file(&seed, &dest).await
        })
        .await
    }

    /// Remove a URL's index entry and cached file
    ///
    /// The path is derived from the URL rather than read from the index, so
    /// the file is removed even when the index has already lost the entry.
    pub async fn delete_url(&self, url: &str, options: &CacheOptions) -> Result<()> {
        if !is_cacheable(url) {
            return Err(CacheError::NotCacheable(url.to_string()));
        }
        let config = self.config.effective(options);
        let cacheable = url_cache_key::cacheable_url(url, &config.query_policy)?;
        let key = url_cache_key::cache_key(&cacheable, &QueryPolicy::All)?;
        let path =
            url_cache_key::full_path(&cacheable, &QueryPolicy::All, &config.cache_location)?;

        self.index.remove(&key).await;
        self.store.delete_file(&path).await?;
        debug!(url = %url, "deleted cached file");
        Ok(())
    }

    /// Flush the index and empty the cache directory
    pub async fn clear_cache(&self, options: &CacheOptions) -> Result<()> {
        let config = self.config.effective(options);
        // flush first so no entry can outlive the file it points at
        self.index.flush().await;
        self.store.clean_dir(&config.cache_location).await
    }

    /// Files currently cached and their total size
    pub async fn cache_info(&self, options: &CacheOptions) -> Result<DirInfo> {
        let config = self.config.effective(options);
        self.store.dir_info(&config.cache_location).await
    }

    /// The shared lookup-verify-fetch-update cycle behind download and seed
    async fn cache_url<F, Fut>(
        &self,
        url: &str,
        config: &CacheConfig,
        fetch: F,
    ) -> Result<CachedFile>
    where
        F: FnOnce(String, PathBuf) -> Fut,
        Fut: Future<Output = Result<PathBuf>>,
    {
        if !is_cacheable(url) {
            return Err(CacheError::NotCacheable(url.to_string()));
        }
        let cacheable = url_cache_key::cacheable_url(url, &config.query_policy)?;
        let key = url_cache_key::cache_key(&cacheable, &QueryPolicy::All)?;

        if let Some(relative) = self.index.get(&key).await {
            let candidate = config.cache_location.join(&relative);
            if self.store.exists(&candidate).await {
                debug!(url = %url, path = %candidate.display(), "cache hit");
                return Ok(CachedFile {
                    file_type: file_type_of(&candidate),
                    path: candidate,
                });
            }
            // the index and the filesystem disagree; treat as a miss
            debug!(url = %url, path = %candidate.display(), "cached file missing, re-fetching");
        }

        // derive the target from the URL alone, never from a stale index value
        let mut relative = url_cache_key::relative_path(&cacheable, &QueryPolicy::All)?;
        let target = config.cache_location.join(&relative);
        self.store.delete_file(&target).await?;

        let final_path = fetch(cacheable, target).await?;
        let file_type = file_type_of(&final_path);
        // the fetch may have produced a different type than the URL implied
        if let Some((stem, _)) = relative.rsplit_once('.') {
            relative = format!("{stem}.{file_type}");
        }
        self.index
            .set(key, relative, Duration::from_secs(config.ttl_secs))
            .await;

        debug!(url = %url, path = %final_path.display(), "cached");
        Ok(CachedFile {
            file_type,
            path: final_path,
        })
    }
}

/// Lowercased extension of a path, empty when there is none
fn file_type_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::ErrorKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::tempdir;

    use async_trait::async_trait;

    /// File store backed by a real temp directory with a simulated network
    struct MockStore {
        disk: DiskStore,
        downloads: Arc<AtomicUsize>,
        copies: Arc<AtomicUsize>,
        fail_urls: Vec<String>,
        served_type: Option<&'static str>,
    }

    impl MockStore {
        fn new(root: &Path) -> Self {
            Self {
                disk: DiskStore::new(root.to_path_buf()),
                downloads: Arc::new(AtomicUsize::new(0)),
                copies: Arc::new(AtomicUsize::new(0)),
                fail_urls: Vec::new(),
                served_type: None,
            }
        }
    }

    #[async_trait]
    impl FileStore for MockStore {
        async fn exists(&self, path: &Path) -> bool {
            self.disk.exists(path).await
        }

        async fn download_file(
            &self,
            url: &str,
            dest: &Path,
            _headers: &HashMap<String, String>,
        ) -> Result<PathBuf> {
            self.downloads.fetch_add(1, Ordering::SeqCst);
            if self.fail_urls.iter().any(|f| url.contains(f.as_str())) {
                return Err(CacheError::Fetch(format!("simulated failure for {url}")));
            }
            let final_path = match self.served_type {
                Some(served) => dest.with_extension(served),
                None => dest.to_path_buf(),
            };
            if let Some(parent) = final_path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&final_path, b"payload").await?;
            Ok(final_path)
        }

        async fn copy_file(&self, src: &Path, dest: &Path) -> Result<PathBuf> {
            self.copies.fetch_add(1, Ordering::SeqCst);
            self.disk.copy_file(src, dest).await
        }

        async fn delete_file(&self, path: &Path) -> Result<()> {
            self.disk.delete_file(path).await
        }

        async fn clean_dir(&self, dir: &Path) -> Result<()> {
            self.disk.clean_dir(dir).await
        }

        async fn dir_info(&self, dir: &Path) -> Result<DirInfo> {
            self.disk.dir_info(dir).await
        }

        fn cache_root_dir(&self) -> PathBuf {
            self.disk.cache_root_dir()
        }
    }

    fn manager_with(
        root: &Path,
        store: MockStore,
    ) -> CacheManager<MemoryIndex, MockStore> {
        let config = CacheConfig {
            cache_location: root.to_path_buf(),
            ..Default::default()
        };
        CacheManager::with_collaborators(config, MemoryIndex::default(), store)
    }

    #[test]
    fn test_is_cacheable() {
        assert!(is_cacheable("http://example.com/a.png"));
        assert!(is_cacheable("HTTPS://example.com/a.png"));
        assert!(!is_cacheable("ftp://example.com/a.png"));
        assert!(!is_cacheable("file:///tmp/a.png"));
        assert!(!is_cacheable(""));
    }

    #[tokio::test]
    async fn test_non_http_url_rejected_before_io() {
        let dir = tempdir().unwrap();
        let store = MockStore::new(dir.path());
        let downloads = store.downloads.clone();
        let manager = manager_with(dir.path(), store);

        let err = manager
            .download_and_cache_url("ftp://example.com/a.png", &CacheOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, CacheError::NotCacheable(_)));
        assert_eq!(downloads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unparseable_http_url_is_invalid() {
        let dir = tempdir().unwrap();
        let manager = manager_with(dir.path(), MockStore::new(dir.path()));

        let err = manager
            .download_and_cache_url("http://", &CacheOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::InvalidUrl(_)));
    }

    #[tokio::test]
    async fn test_second_call_is_a_verified_hit() {
        let dir = tempdir().unwrap();
        let store = MockStore::new(dir.path());
        let downloads = store.downloads.clone();
        let manager = manager_with(dir.path(), store);
        let url = "https://example.com/photos/cat.png";

        let first = manager
            .download_and_cache_url(url, &CacheOptions::default())
            .await
            .unwrap();
        let second = manager
            .download_and_cache_url(url, &CacheOptions::default())
            .await
            .unwrap();

        assert_eq!(downloads.load(Ordering::SeqCst), 1);
        assert_eq!(first, second);
        assert_eq!(first.file_type, "png");
        assert!(first.path.starts_with(dir.path()));
    }

    #[tokio::test]
    async fn test_externally_deleted_file_heals_on_next_call() {
        let dir = tempdir().unwrap();
        let store = MockStore::new(dir.path());
        let downloads = store.downloads.clone();
        let manager = manager_with(dir.path(), store);
        let url = "https://example.com/cat.png";

        let cached = manager
            .download_and_cache_url(url, &CacheOptions::default())
            .await
            .unwrap();
        std::fs::remove_file(&cached.path).unwrap();

        let healed = manager
            .download_and_cache_url(url, &CacheOptions::default())
            .await
            .unwrap();

        assert_eq!(downloads.load(Ordering::SeqCst), 2);
        assert!(healed.path.exists());
    }

    #[tokio::test]
    async fn test_expired_entry_triggers_refetch() {
        let dir = tempdir().unwrap();
        let store = MockStore::new(dir.path());
        let downloads = store.downloads.clone();
        let manager = manager_with(dir.path(), store);
        let url = "https://example.com/cat.png";
        let options = CacheOptions {
            ttl_secs: Some(0),
            ..Default::default()
        };

        manager.download_and_cache_url(url, &options).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        manager.download_and_cache_url(url, &options).await.unwrap();

        assert_eq!(downloads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_served_type_rewrites_extension_and_stays_a_hit() {
        let dir = tempdir().unwrap();
        let mut store = MockStore::new(dir.path());
        store.served_type = Some("png");
        let downloads = store.downloads.clone();
        let manager = manager_with(dir.path(), store);
        // the URL implies jpg, the "server" serves png
        let url = "https://example.com/picture.jpg";

        let first = manager
            .download_and_cache_url(url, &CacheOptions::default())
            .await
            .unwrap();
        assert_eq!(first.file_type, "png");
        assert!(first.path.to_string_lossy().ends_with(".png"));

        // the rewritten index entry must verify against the png on disk
        let second = manager
            .download_and_cache_url(url, &CacheOptions::default())
            .await
            .unwrap();
        assert_eq!(second, first);
        assert_eq!(downloads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_download_leaves_cache_unchanged() {
        let dir = tempdir().unwrap();
        let mut store = MockStore::new(dir.path());
        store.fail_urls = vec!["cat.png".to_string()];
        let downloads = store.downloads.clone();
        let manager = manager_with(dir.path(), store);
        let url = "https://example.com/cat.png";

        let err = manager
            .download_and_cache_url(url, &CacheOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::Fetch(_)));

        // nothing was indexed, so the next call attempts a fresh fetch
        let err = manager
            .download_and_cache_url(url, &CacheOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::Fetch(_)));
        assert_eq!(downloads.load(Ordering::SeqCst), 2);

        let info = manager.cache_info(&CacheOptions::default()).await.unwrap();
        assert!(info.files.is_empty());
    }

    #[tokio::test]
    async fn test_seed_and_cache_uses_no_network() {
        let dir = tempdir().unwrap();
        let seed = dir.path().join("local.png");
        std::fs::write(&seed, b"seeded").unwrap();

        let store = MockStore::new(dir.path());
        let downloads = store.downloads.clone();
        let copies = store.copies.clone();
        let manager = manager_with(dir.path(), store);
        let url = "https://example.com/cat.png";

        let seeded = manager
            .seed_and_cache_url(url, &seed, &CacheOptions::default())
            .await
            .unwrap();
        assert_eq!(copies.load(Ordering::SeqCst), 1);
        assert_eq!(std::fs::read(&seeded.path).unwrap(), b"seeded");

        // the seeded entry satisfies a later download request as a hit
        let hit = manager
            .download_and_cache_url(url, &CacheOptions::default())
            .await
            .unwrap();
        assert_eq!(hit.path, seeded.path);
        assert_eq!(downloads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_delete_url_removes_file_and_entry() {
        let dir = tempdir().unwrap();
        let store = MockStore::new(dir.path());
        let downloads = store.downloads.clone();
        let manager = manager_with(dir.path(), store);
        let url = "https://example.com/cat.png";

        let cached = manager
            .download_and_cache_url(url, &CacheOptions::default())
            .await
            .unwrap();
        manager.delete_url(url, &CacheOptions::default()).await.unwrap();

        assert!(!cached.path.exists());
        // both the entry and the file are gone, so the next call re-fetches
        manager
            .download_and_cache_url(url, &CacheOptions::default())
            .await
            .unwrap();
        assert_eq!(downloads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_delete_url_never_cached_is_ok() {
        let dir = tempdir().unwrap();
        let manager = manager_with(dir.path(), MockStore::new(dir.path()));

        manager
            .delete_url("https://example.com/never.png", &CacheOptions::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_clear_cache_empties_index_and_directory() {
        let dir = tempdir().unwrap();
        let store = MockStore::new(dir.path());
        let downloads = store.downloads.clone();
        let manager = manager_with(dir.path(), store);

        for url in [
            "https://example.com/a.png",
            "https://example.com/b.gif",
        ] {
            manager
                .download_and_cache_url(url, &CacheOptions::default())
                .await
                .unwrap();
        }

        manager.clear_cache(&CacheOptions::default()).await.unwrap();

        let info = manager.cache_info(&CacheOptions::default()).await.unwrap();
        assert!(info.files.is_empty());
        assert_eq!(info.total_size_bytes, 0);

        // entries did not survive the flush: both URLs fetch again
        for url in [
            "https://example.com/a.png",
            "https://example.com/b.gif",
        ] {
            manager
                .download_and_cache_url(url, &CacheOptions::default())
                .await
                .unwrap();
        }
        assert_eq!(downloads.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_cache_info_reports_files_and_size() {
        let dir = tempdir().unwrap();
        let manager = manager_with(dir.path(), MockStore::new(dir.path()));

        manager
            .download_and_cache_url("https://example.com/a.png", &CacheOptions::default())
            .await
            .unwrap();
        manager
            .download_and_cache_url("https://other.com/b.jpg", &CacheOptions::default())
            .await
            .unwrap();

        let info = manager.cache_info(&CacheOptions::default()).await.unwrap();
        assert_eq!(info.files.len(), 2);
        // the mock writes b"payload" for every download
        assert_eq!(info.total_size_bytes, 14);
    }

    #[tokio::test]
    async fn test_query_policy_controls_key_identity() {
        let dir = tempdir().unwrap();
        let store = MockStore::new(dir.path());
        let downloads = store.downloads.clone();
        let manager = manager_with(dir.path(), store);

        // default policy ignores the query: one fetch serves both
        manager
            .download_and_cache_url(
                "https://example.com/i.png?v=1",
                &CacheOptions::default(),
            )
            .await
            .unwrap();
        manager
            .download_and_cache_url(
                "https://example.com/i.png?v=2",
                &CacheOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(downloads.load(Ordering::SeqCst), 1);

        // with all params in the key the variants are distinct entries
        let options = CacheOptions {
            query_policy: Some(QueryPolicy::All),
            ..Default::default()
        };
        manager
            .download_and_cache_url("https://example.com/i.png?v=1", &options)
            .await
            .unwrap();
        manager
            .download_and_cache_url("https://example.com/i.png?v=2", &options)
            .await
            .unwrap();
        assert_eq!(downloads.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_files_shard_under_host_buckets() {
        let dir = tempdir().unwrap();
        let manager = manager_with(dir.path(), MockStore::new(dir.path()));

        let a = manager
            .download_and_cache_url("https://one.example.com/a.png", &CacheOptions::default())
            .await
            .unwrap();
        let b = manager
            .download_and_cache_url("https://two.example.com/a.png", &CacheOptions::default())
            .await
            .unwrap();

        assert_ne!(a.path.parent(), b.path.parent());
        assert!(a
            .path
            .parent()
            .unwrap()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("one_example_com_"));
    }

    #[tokio::test]
    async fn test_stale_leftover_file_is_deleted_before_fetch() {
        let dir = tempdir().unwrap();
        let store = MockStore::new(dir.path());
        let manager = manager_with(dir.path(), store);
        let url = "https://example.com/cat.png";

        // plant a leftover file at the derived location with no index entry
        let planted = url_cache_key::full_path(url, &QueryPolicy::Ignore, dir.path()).unwrap();
        std::fs::create_dir_all(planted.parent().unwrap()).unwrap();
        std::fs::write(&planted, b"stale leftover").unwrap();

        let cached = manager
            .download_and_cache_url(url, &CacheOptions::default())
            .await
            .unwrap();

        // the leftover was replaced by the fresh download
        assert_eq!(std::fs::read(&cached.path).unwrap(), b"payload");
    }

    #[test]
    fn test_file_type_of() {
        assert_eq!(file_type_of(Path::new("/a/b/c.PNG")), "png");
        assert_eq!(file_type_of(Path::new("/a/b/c")), "");
    }

    #[tokio::test]
    async fn test_io_error_kind_preserved_through_source() {
        let dir = tempdir().unwrap();
        let manager = manager_with(dir.path(), MockStore::new(dir.path()));

        let err = manager
            .seed_and_cache_url(
                "https://example.com/cat.png",
                Path::new("/nonexistent/seed.png"),
                &CacheOptions::default(),
            )
            .await
            .unwrap_err();

        match err {
            CacheError::Io(inner) => assert_eq!(inner.kind(), ErrorKind::NotFound),
            other => panic!("expected Io error, got {other:?}"),
        }
    }
}
