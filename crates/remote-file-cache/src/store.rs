//! Filesystem collaborator: disk I/O and HTTP downloads
//!
//! `FileStore` is the surface the cache manager depends on; `DiskStore` is the
//! local-disk implementation backed by `tokio::fs` and a `reqwest` client.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{CacheError, Result};
use crate::types::DirInfo;

/// Filesystem surface consumed by the cache manager
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Whether a file exists at the path
    async fn exists(&self, path: &Path) -> bool;

    /// Download a URL to the destination path, returning the path actually
    /// written (its extension may differ from the destination's when the
    /// server serves a different file type)
    async fn download_file(
        &self,
        url: &str,
        dest: &Path,
        headers: &HashMap<String, String>,
    ) -> Result<PathBuf>;

    /// Copy a local file to the destination path
    async fn copy_file(&self, src: &Path, dest: &Path) -> Result<PathBuf>;

    /// Delete a file; an absent path is a no-op, not an error
    async fn delete_file(&self, path: &Path) -> Result<()>;

    /// Remove a directory tree and recreate it empty
    async fn clean_dir(&self, dir: &Path) -> Result<()>;

    /// List files under a directory recursively with their total size
    async fn dir_info(&self, dir: &Path) -> Result<DirInfo>;

    /// Root directory this store caches under
    fn cache_root_dir(&self) -> PathBuf;
}

/// Local-disk store downloading over HTTP(S)
pub struct DiskStore {
    client: reqwest::Client,
    root: PathBuf,
}

impl DiskStore {
    /// Store rooted at `root` with default TLS verification
    pub fn new(root: PathBuf) -> Self {
        Self::with_tls(root, false)
    }

    /// Store rooted at `root`, optionally accepting self-signed certificates
    pub fn with_tls(root: PathBuf, allow_self_signed_ssl: bool) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .danger_accept_invalid_certs(allow_self_signed_ssl)
            .build()
            .expect("Failed to create HTTP client");
        Self { client, root }
    }
}

#[async_trait]
impl FileStore for DiskStore {
    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }

    async fn download_file(
        &self,
        url: &str,
        dest: &Path,
        headers: &HashMap<String, String>,
    ) -> Result<PathBuf> {
        let mut request = self.client.get(url);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(CacheError::Fetch(format!(
                "{} returned status {}",
                url,
                response.status()
            )));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        // buffer the whole body before touching the filesystem so a failed
        // transfer leaves no partial file behind
        let body = response.bytes().await?;

        let final_path = match content_type.as_deref().and_then(file_type_for_content_type) {
            Some(served) if !matches_file_type(dest, served) => dest.with_extension(served),
            _ => dest.to_path_buf(),
        };

        if let Some(parent) = final_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&final_path, &body).await?;

        debug!(
            url = %url,
            path = %final_path.display(),
            bytes = body.len(),
            "downloaded file"
        );
        Ok(final_path)
    }

    async fn copy_file(&self, src: &Path, dest: &Path) -> Result<PathBuf> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(src, dest).await?;
        Ok(dest.to_path_buf())
    }

    async fn delete_file(&self, path: &Path) -> Result<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn clean_dir(&self, dir: &Path) -> Result<()> {
        match tokio::fs::remove_dir_all(dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        tokio::fs::create_dir_all(dir).await?;
        Ok(())
    }

    async fn dir_info(&self, dir: &Path) -> Result<DirInfo> {
        let mut info = DirInfo::default();
        let mut pending = vec![dir.to_path_buf()];

        while let Some(current) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&current).await {
                Ok(entries) => entries,
                // a cache that was never written to is empty, not an error
                Err(e) if e.kind() == ErrorKind::NotFound && current == dir => return Ok(info),
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let metadata = entry.metadata().await?;
                if metadata.is_dir() {
                    pending.push(entry.path());
                } else {
                    info.total_size_bytes += metadata.len();
                    info.files.push(entry.path());
                }
            }
        }

        Ok(info)
    }

    fn cache_root_dir(&self) -> PathBuf {
        self.root.clone()
    }
}

/// Known file type implied by a Content-Type header, if any
fn file_type_for_content_type(content_type: &str) -> Option<&'static str> {
    let essence = content_type.split(';').next().unwrap_or("").trim();
    match essence {
        "image/png" => Some("png"),
        "image/jpeg" => Some("jpg"),
        "image/gif" => Some("gif"),
        "image/bmp" => Some("bmp"),
        "image/tiff" => Some("tiff"),
        _ => None,
    }
}

/// Whether the path's extension already names the given type
/// (jpg/jpeg and tif/tiff are the same type)
fn matches_file_type(path: &Path, file_type: &str) -> bool {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    if ext == file_type {
        return true;
    }
    matches!(
        (ext.as_str(), file_type),
        ("jpeg", "jpg") | ("jpg", "jpeg") | ("tif", "tiff") | ("tiff", "tif")
    )
}
