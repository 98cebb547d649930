//! Cache-key and storage-path derivation for URL-addressed files
//!
//! Maps http(s) URLs onto stable, collision-resistant cache keys and sharded
//! relative storage paths of the form `{host_bucket}/{key}.{type}`. All
//! functions are pure: the same URL and query policy always produce the same
//! key, regardless of query-parameter order.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use url::Url;

/// File types recognized in URL paths; anything else resolves to `jpg`
const KNOWN_FILE_TYPES: &[&str] = &["png", "jpeg", "jpg", "gif", "bmp", "tiff", "tif"];

/// Which query parameters participate in cache-key derivation
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum QueryPolicy {
    /// The query string is ignored entirely
    #[default]
    Ignore,
    /// Every query parameter participates
    All,
    /// Only the named parameters participate
    Names(Vec<String>),
}

/// Errors from key derivation
#[derive(Debug)]
pub enum KeyError {
    InvalidUrl(String),
}

impl fmt::Display for KeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidUrl(msg) => write!(f, "Invalid URL: {msg}"),
        }
    }
}

impl std::error::Error for KeyError {}

pub type Result<T> = std::result::Result<T, KeyError>;

fn parse(url: &str) -> Result<Url> {
    Url::parse(url).map_err(|e| KeyError::InvalidUrl(format!("{url}: {e}")))
}

fn hash_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

/// Values of the selected query parameters, ordered by sorted key and
/// comma-joined. Later occurrences of a duplicate key win.
fn query_for_key(url: &Url, policy: &QueryPolicy) -> String {
    let mut selected: BTreeMap<String, String> = BTreeMap::new();
    match policy {
        QueryPolicy::Ignore => {}
        QueryPolicy::All => {
            for (key, value) in url.query_pairs() {
                selected.insert(key.into_owned(), value.into_owned());
            }
        }
        QueryPolicy::Names(names) => {
            for (key, value) in url.query_pairs() {
                if names.iter().any(|n| n == key.as_ref()) {
                    selected.insert(key.into_owned(), value.into_owned());
                }
            }
        }
    }
    selected.values().cloned().collect::<Vec<_>>().join(",")
}

/// Lowercased extension of a path's last segment when it names a known file
/// type; everything else (including no extension) resolves to `jpg`
fn resolved_file_type(file_name: &str) -> String {
    let ext = match file_name.rsplit_once('.') {
        Some((_, ext)) => ext.to_ascii_lowercase(),
        None => String::new(),
    };
    if KNOWN_FILE_TYPES.contains(&ext.as_str()) {
        ext
    } else {
        "jpg".to_string()
    }
}

/// Rewrite a URL so it carries only the query parameters selected by `policy`.
///
/// The result is what the cache actually fetches and what the index key is
/// derived from, so two URLs differing only in ignored parameters collapse
/// into one cache entry.
pub fn cacheable_url(url: &str, policy: &QueryPolicy) -> Result<String> {
    let mut parsed = parse(url)?;
    match policy {
        QueryPolicy::All => {}
        QueryPolicy::Ignore => parsed.set_query(None),
        QueryPolicy::Names(names) => {
            let kept: Vec<(String, String)> = parsed
                .query_pairs()
                .filter(|(key, _)| names.iter().any(|n| n == key.as_ref()))
                .map(|(key, value)| (key.into_owned(), value.into_owned()))
                .collect();
            parsed.set_query(None);
            if !kept.is_empty() {
                parsed.query_pairs_mut().extend_pairs(kept);
            }
        }
    }
    Ok(parsed.to_string())
}

/// Derive the cache key for a URL: a hash over the path, the resolved file
/// type, and the selected query-parameter values, suffixed with the type.
pub fn cache_key(url: &str, policy: &QueryPolicy) -> Result<String> {
    let parsed = parse(url)?;
    let path = parsed.path();
    // last path segment is the file name, the rest is the directory part
    let (dir_part, file_name) = match path.rsplit_once('/') {
        Some((dir, file)) => (dir, file),
        None => ("", path),
    };
    let file_type = resolved_file_type(file_name);
    let material = format!(
        "{}{}{}{}",
        dir_part,
        file_name,
        file_type,
        query_for_key(&parsed, policy)
    );
    Ok(format!("{}.{}", hash_hex(&material), file_type))
}

/// Sanitized host directory shared by every URL of the same origin.
///
/// Characters outside `[a-z0-9_]` are replaced with `_`; a hash of the raw
/// host is appended so distinct hosts that sanitize alike stay separate.
pub fn host_bucket(url: &str) -> Result<String> {
    let parsed = parse(url)?;
    let host = match (parsed.host_str(), parsed.port()) {
        (Some(host), Some(port)) => format!("{host}:{port}"),
        (Some(host), None) => host.to_string(),
        (None, _) => String::new(),
    };
    let sanitized: String = host
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    Ok(format!("{}_{}", sanitized, hash_hex(&host)))
}

/// Relative storage path for a URL: `{host_bucket}/{cache_key}`
pub fn relative_path(url: &str, policy: &QueryPolicy) -> Result<String> {
    Ok(format!("{}/{}", host_bucket(url)?, cache_key(url, policy)?))
}

/// Absolute storage path for a URL under a cache root
pub fn full_path(url: &str, policy: &QueryPolicy, cache_location: &Path) -> Result<PathBuf> {
    Ok(cache_location.join(relative_path(url, policy)?))
}
