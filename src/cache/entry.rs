//! Cache entries and build-dependency fingerprints

use std::collections::BTreeMap;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::trace;

use super::error::CacheError;
use crate::hash::{ContentHash, ContentHasher};

/// Bumped whenever the encoding of cached values changes.
pub const ENTRY_FORMAT_VERSION: u32 = 1;

/// A serialized result plus the fingerprint it was produced under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Build-dependency fingerprint at write time
    pub etag: ContentHash,

    pub format: u32,

    pub data: Vec<u8>,
}

impl CacheEntry {
    /// Serialize `value` under the given etag
    pub fn encode<T: Serialize>(etag: ContentHash, value: &T) -> Result<Self, CacheError> {
        let data = bincode::serde::encode_to_vec(value, bincode::config::standard())
            .map_err(|e| CacheError::Serialization {
                reason: e.to_string(),
            })?;
        Ok(Self {
            etag,
            format: ENTRY_FORMAT_VERSION,
            data,
        })
    }

    /// Decode the value if the entry is still valid for `etag`.
    ///
    /// A stale etag, a foreign format version or undecodable bytes are all
    /// plain misses.
    pub fn decode<T: DeserializeOwned>(&self, etag: &ContentHash) -> Option<T> {
        if self.etag != *etag {
            trace!("cache entry etag mismatch");
            return None;
        }
        if self.format != ENTRY_FORMAT_VERSION {
            trace!("cache entry format {} != {}", self.format, ENTRY_FORMAT_VERSION);
            return None;
        }
        bincode::serde::decode_from_slice(&self.data, bincode::config::standard())
            .ok()
            .map(|(value, _)| value)
    }
}

/// Key for a cache entry: namespace + identifier + content digest.
pub fn cache_key(namespace: &str, identifier: &str, digest: &ContentHash) -> ContentHash {
    let mut hasher = ContentHasher::new();
    hasher
        .field(namespace.as_bytes())
        .field(identifier.as_bytes())
        .field(digest.as_bytes());
    hasher.finalize()
}

/// The external inputs whose change invalidates every cached result:
/// config files, tool version markers and declared file dependencies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildDependencies {
    /// name -> digest, `None` when a declared file is missing
    digests: BTreeMap<String, Option<ContentHash>>,
}

impl BuildDependencies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a version marker such as the tool version
    pub fn add_marker(&mut self, name: &str, value: &str) {
        self.digests
            .insert(name.to_string(), Some(ContentHash::of(value.as_bytes())));
    }

    /// Record a fingerprint computed by the caller (e.g. the file watcher)
    pub fn add_digest(&mut self, name: &str, digest: ContentHash) {
        self.digests.insert(name.to_string(), Some(digest));
    }

    /// Hash a file on disk. A missing file is recorded as missing rather than
    /// failing, so that creating it later invalidates the cache.
    pub fn add_file(&mut self, path: &Path) {
        let digest = std::fs::read(path).ok().map(|bytes| ContentHash::of(&bytes));
        self.digests.insert(path.display().to_string(), digest);
    }

    /// Combined fingerprint over every recorded dependency
    pub fn fingerprint(&self) -> ContentHash {
        let mut hasher = ContentHasher::new();
        for (name, digest) in &self.digests {
            hasher.field(name.as_bytes());
            match digest {
                Some(digest) => hasher.field(digest.as_bytes()),
                None => hasher.field(b"<missing>"),
            };
        }
        hasher.finalize()
    }

    /// Printable digests, as stored in the pack index
    pub fn describe(&self) -> BTreeMap<String, String> {
        self.digests
            .iter()
            .map(|(name, digest)| {
                let value = digest
                    .map(|d| d.to_string())
                    .unwrap_or_else(|| "missing".to_string());
                (name.clone(), value)
            })
            .collect()
    }
}
