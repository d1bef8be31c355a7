//! Error types for the persistent cache

use std::path::PathBuf;

/// Errors raised while reading or writing persisted cache state.
///
/// Reads are fail-safe and turn most of these into cache misses; the enum
/// mainly carries context for logging and for write failures.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid pack header in {path}: {reason}")]
    InvalidHeader { path: PathBuf, reason: String },

    #[error("checksum mismatch in {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("pack format version mismatch in {path}: expected {expected}, got {actual}")]
    VersionMismatch {
        path: PathBuf,
        expected: u32,
        actual: u32,
    },

    #[error("cache serialization error: {reason}")]
    Serialization { reason: String },
}

impl CacheError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CacheError::Io {
            path: path.into(),
            source,
        }
    }
}
