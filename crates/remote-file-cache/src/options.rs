//! Cache configuration and per-call options
//!
//! `CacheConfig` is the immutable process-wide configuration; `CacheOptions`
//! carries per-call overrides. An effective config is computed for every call
//! by layering the overrides into a fresh value, so the shared defaults are
//! never mutated.

use std::collections::HashMap;
use std::path::PathBuf;

use url_cache_key::QueryPolicy;

/// Default entry TTL: two weeks
pub const DEFAULT_TTL_SECS: u64 = 60 * 60 * 24 * 14;

/// Process-wide cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Headers sent with every download request
    pub headers: HashMap<String, String>,
    /// Seconds an index entry stays valid
    pub ttl_secs: u64,
    /// Which query parameters participate in cache keys
    pub query_policy: QueryPolicy,
    /// Root directory of the on-disk cache
    pub cache_location: PathBuf,
    /// Accept self-signed TLS certificates when downloading
    pub allow_self_signed_ssl: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            headers: HashMap::new(),
            ttl_secs: DEFAULT_TTL_SECS,
            query_policy: QueryPolicy::Ignore,
            cache_location: default_cache_location(),
            allow_self_signed_ssl: false,
        }
    }
}

impl CacheConfig {
    /// Layer per-call overrides over this config into a new effective value
    pub fn effective(&self, options: &CacheOptions) -> CacheConfig {
        CacheConfig {
            headers: options
                .headers
                .clone()
                .unwrap_or_else(|| self.headers.clone()),
            ttl_secs: options.ttl_secs.unwrap_or(self.ttl_secs),
            query_policy: options
                .query_policy
                .clone()
                .unwrap_or_else(|| self.query_policy.clone()),
            cache_location: options
                .cache_location
                .clone()
                .unwrap_or_else(|| self.cache_location.clone()),
            allow_self_signed_ssl: self.allow_self_signed_ssl,
        }
    }
}

/// Per-call overrides; unset fields fall back to the process-wide config
#[derive(Debug, Clone, Default)]
pub struct CacheOptions {
    pub headers: Option<HashMap<String, String>>,
    pub ttl_secs: Option<u64>,
    pub query_policy: Option<QueryPolicy>,
    pub cache_location: Option<PathBuf>,
}

/// Platform cache directory, falling back to the system temp dir
fn default_cache_location() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("remote-file-cache")
}
