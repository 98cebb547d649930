//! Shared cache types

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A successfully cached file: its local path and resolved file type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedFile {
    pub path: PathBuf,
    pub file_type: String,
}

/// Aggregate view of the on-disk cache directory
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirInfo {
    pub files: Vec<PathBuf>,
    pub total_size_bytes: u64,
}
