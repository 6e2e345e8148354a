//! Error types for the response cache.
//!
//! Every variant is recoverable: callers may retry, skip caching, or surface
//! the failure. Only [`CacheError::DirectoryCreation`] during construction
//! leaves a cache instance unusable.
//!
//! `CacheError` is `Clone` so one in-flight lookup result can be handed to
//! every waiter that joined it; underlying I/O and serde errors are kept
//! behind `Arc`.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CacheError>;

/// Errors raised by cache tiers and the coordinator.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// The cache root is inaccessible or the cache directory could not be created.
    #[error("failed to create cache directory {path:?}: {source}")]
    DirectoryCreation {
        path: PathBuf,
        #[source]
        source: Arc<std::io::Error>,
    },

    /// An entry could not be serialized to its on-disk form.
    #[error("failed to encode cache entry: {0}")]
    Encoding(#[source] Arc<serde_json::Error>),

    /// A stored entry was corrupt. The offending file has already been deleted.
    #[error("failed to decode cache entry {key}: {reason}")]
    Decoding { key: String, reason: String },

    /// Writing, renaming or deleting a cache file failed.
    #[error("failed to write cache file {path:?}: {source}")]
    DiskWrite {
        path: PathBuf,
        #[source]
        source: Arc<std::io::Error>,
    },

    /// Reading a cache file failed for a reason other than corruption.
    #[error("failed to read cache file {path:?}: {source}")]
    DiskRead {
        path: PathBuf,
        #[source]
        source: Arc<std::io::Error>,
    },

    /// Eviction could not free enough space for the entry being stored.
    #[error("disk cache full: need {required} bytes, only {available} can be freed")]
    CacheFull { required: u64, available: u64 },

    /// A key or hash was malformed.
    #[error("invalid cache key: {0}")]
    InvalidKey(String),

    /// Reserved: a miss is reported as `Ok(None)`, never as this error.
    #[error("cache entry not found: {0}")]
    EntryNotFound(String),

    /// The task driving an in-flight lookup was cancelled or panicked.
    #[error("cache operation cancelled")]
    Cancelled,

    /// Configuration failed to load or validate.
    #[error("invalid cache configuration: {0}")]
    InvalidConfig(String),

    /// A caller-supplied fetch closure failed during `get_or_fetch`.
    #[error("fetch failed: {0}")]
    Fetch(String),
}

impl CacheError {
    pub(crate) fn disk_write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::DiskWrite {
            path: path.into(),
            source: Arc::new(source),
        }
    }

    pub(crate) fn disk_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::DiskRead {
            path: path.into(),
            source: Arc::new(source),
        }
    }

    /// Returns `true` for errors that originate from disk I/O or on-disk data.
    pub fn is_disk_fault(&self) -> bool {
        matches!(
            self,
            Self::DiskWrite { .. } | Self::DiskRead { .. } | Self::Decoding { .. }
        )
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        Self::Encoding(Arc::new(e))
    }
}
