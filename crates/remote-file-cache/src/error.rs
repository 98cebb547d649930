//! Error types for the remote file cache

use std::fmt;

#[derive(Debug)]
pub enum CacheError {
    /// URL is empty or not http(s); rejected before any I/O
    NotCacheable(String),
    /// URL failed to parse during key derivation
    InvalidUrl(String),
    /// Network or HTTP failure while downloading
    Fetch(String),
    /// Local filesystem failure
    Io(Box<std::io::Error>),
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotCacheable(url) => write!(f, "URL is not cacheable: {url}"),
            Self::InvalidUrl(msg) => write!(f, "Invalid URL: {msg}"),
            Self::Fetch(msg) => write!(f, "Fetch error: {msg}"),
            Self::Io(err) => write!(f, "IO error: {err}"),
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(Box::new(err))
    }
}

impl From<reqwest::Error> for CacheError {
    fn from(err: reqwest::Error) -> Self {
        Self::Fetch(err.to_string())
    }
}

impl From<url_cache_key::KeyError> for CacheError {
    fn from(err: url_cache_key::KeyError) -> Self {
        match err {
            url_cache_key::KeyError::InvalidUrl(msg) => Self::InvalidUrl(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
