//! Persistent pack files
//!
//! On disk a cache namespace is a directory holding `index.json` and one or
//! more immutable `pack-<n>.pack` files. The index records the pack order and
//! the build-dependency digests that were valid when it was written. Each
//! pack is a 4-byte little-endian header length, a bincode header (magic,
//! format version, payload checksum) and the bincode payload.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::entry::{BuildDependencies, CacheEntry};
use super::error::CacheError;
use crate::hash::ContentHash;

const PACK_MAGIC: [u8; 4] = *b"SPCK";

const PACK_FORMAT_VERSION: u32 = 1;

const INDEX_FILE: &str = "index.json";

/// One immutable layer of cache entries
pub type PackLayer = HashMap<ContentHash, Arc<CacheEntry>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PackHeader {
    magic: [u8; 4],
    format_version: u32,
    checksum: ContentHash,
}

/// Layer order and validity fingerprint of a persisted namespace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackIndex {
    pub format_version: u32,

    /// Combined build-dependency fingerprint, hex
    pub fingerprint: String,

    /// Individual build-dependency digests, for diagnostics
    pub build_dependencies: BTreeMap<String, String>,

    /// Pack file names, oldest first
    pub packs: Vec<String>,

    pub next_pack: u64,
}

/// Reads and writes the pack files of one cache namespace.
pub struct PackStore {
    dir: PathBuf,
    max_packs: usize,
}

impl PackStore {
    pub fn new(cache_dir: &Path, namespace: &str, max_packs: usize) -> Self {
        Self {
            dir: cache_dir.join(namespace),
            max_packs: max_packs.max(1),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Load every pack, oldest first.
    ///
    /// Fail-safe: a missing or unreadable index yields no layers, a corrupt
    /// pack is skipped, and a fingerprint mismatch discards the whole
    /// namespace.
    pub fn load(&self, deps: &BuildDependencies) -> Vec<PackLayer> {
        let Some(index) = self.read_index() else {
            debug!("No pack index in {}", self.dir.display());
            return Vec::new();
        };

        let fingerprint = deps.fingerprint().to_string();
        if index.format_version != PACK_FORMAT_VERSION || index.fingerprint != fingerprint {
            info!(
                "Build dependencies changed, discarding cache at {}",
                self.dir.display()
            );
            if let Err(e) = self.clear() {
                warn!("Failed to discard stale cache: {}", e);
            }
            return Vec::new();
        }

        let mut layers = Vec::with_capacity(index.packs.len());
        for name in &index.packs {
            match self.read_pack(&self.dir.join(name)) {
                Ok(layer) => layers.push(layer),
                Err(e) => warn!("Ignoring unreadable pack {}: {}", name, e),
            }
        }

        debug!("Loaded {} pack(s) from {}", layers.len(), self.dir.display());
        layers
    }

    /// Append `delta` as a new pack and compact when too many packs exist.
    pub fn save(&self, deps: &BuildDependencies, delta: &PackLayer) -> Result<(), CacheError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| CacheError::io(&self.dir, e))?;

        let fingerprint = deps.fingerprint().to_string();
        let mut index = match self.read_index() {
            Some(index)
                if index.fingerprint == fingerprint
                    && index.format_version == PACK_FORMAT_VERSION =>
            {
                index
            }
            _ => PackIndex {
                format_version: PACK_FORMAT_VERSION,
                fingerprint,
                build_dependencies: deps.describe(),
                packs: Vec::new(),
                next_pack: 0,
            },
        };

        if !delta.is_empty() {
            let name = format!("pack-{}.pack", index.next_pack);
            self.write_pack(&self.dir.join(&name), delta)?;
            index.packs.push(name);
            index.next_pack += 1;
        }

        if index.packs.len() > self.max_packs {
            self.compact(&mut index)?;
        }

        self.write_index(&index)
    }

    /// Remove the namespace directory
    pub fn clear(&self) -> Result<(), CacheError> {
        if self.dir.exists() {
            std::fs::remove_dir_all(&self.dir).map_err(|e| CacheError::io(&self.dir, e))?;
        }
        Ok(())
    }

    fn compact(&self, index: &mut PackIndex) -> Result<(), CacheError> {
        debug!("Compacting {} packs", index.packs.len());

        let mut merged = PackLayer::new();
        for name in &index.packs {
            if let Ok(layer) = self.read_pack(&self.dir.join(name)) {
                merged.extend(layer);
            }
        }

        let name = format!("pack-{}.pack", index.next_pack);
        self.write_pack(&self.dir.join(&name), &merged)?;
        index.next_pack += 1;

        for old in std::mem::replace(&mut index.packs, vec![name]) {
            let path = self.dir.join(&old);
            if let Err(e) = std::fs::remove_file(&path) {
                warn!("Failed to remove compacted pack {}: {}", path.display(), e);
            }
        }
        Ok(())
    }

    fn read_index(&self) -> Option<PackIndex> {
        let content = std::fs::read_to_string(self.dir.join(INDEX_FILE)).ok()?;
        serde_json::from_str(&content).ok()
    }

    fn write_index(&self, index: &PackIndex) -> Result<(), CacheError> {
        let path = self.dir.join(INDEX_FILE);
        let json = serde_json::to_string_pretty(index).map_err(|e| CacheError::Serialization {
            reason: e.to_string(),
        })?;
        std::fs::write(&path, json).map_err(|e| CacheError::io(path, e))
    }

    fn write_pack(&self, path: &Path, layer: &PackLayer) -> Result<(), CacheError> {
        let mut entries: Vec<(&ContentHash, &CacheEntry)> =
            layer.iter().map(|(k, v)| (k, v.as_ref())).collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));

        let payload = bincode::serde::encode_to_vec(&entries, bincode::config::standard())
            .map_err(|e| CacheError::Serialization {
                reason: e.to_string(),
            })?;

        let header = PackHeader {
            magic: PACK_MAGIC,
            format_version: PACK_FORMAT_VERSION,
            checksum: ContentHash::of(&payload),
        };
        let header_bytes = bincode::serde::encode_to_vec(&header, bincode::config::standard())
            .map_err(|e| CacheError::Serialization {
                reason: e.to_string(),
            })?;

        let mut output = Vec::with_capacity(4 + header_bytes.len() + payload.len());
        output.extend_from_slice(&(header_bytes.len() as u32).to_le_bytes());
        output.extend_from_slice(&header_bytes);
        output.extend_from_slice(&payload);

        std::fs::write(path, &output).map_err(|e| CacheError::io(path, e))
    }

    fn read_pack(&self, path: &Path) -> Result<PackLayer, CacheError> {
        let raw = std::fs::read(path).map_err(|e| CacheError::io(path, e))?;
        let invalid = |reason: &str| CacheError::InvalidHeader {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        };

        if raw.len() < 4 {
            return Err(invalid("truncated header length"));
        }
        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&raw[..4]);
        let header_len = u32::from_le_bytes(len_bytes) as usize;
        if raw.len() < 4 + header_len {
            return Err(invalid("truncated header"));
        }

        let (header, _): (PackHeader, usize) =
            bincode::serde::decode_from_slice(&raw[4..4 + header_len], bincode::config::standard())
                .map_err(|e| invalid(&e.to_string()))?;

        if header.magic != PACK_MAGIC {
            return Err(invalid("bad magic bytes"));
        }
        if header.format_version != PACK_FORMAT_VERSION {
            return Err(CacheError::VersionMismatch {
                path: path.to_path_buf(),
                expected: PACK_FORMAT_VERSION,
                actual: header.format_version,
            });
        }

        let payload = &raw[4 + header_len..];
        let actual = ContentHash::of(payload);
        if actual != header.checksum {
            return Err(CacheError::ChecksumMismatch {
                path: path.to_path_buf(),
                expected: header.checksum.to_string(),
                actual: actual.to_string(),
            });
        }

        let (entries, _): (Vec<(ContentHash, CacheEntry)>, usize) =
            bincode::serde::decode_from_slice(payload, bincode::config::standard()).map_err(
                |e| CacheError::Serialization {
                    reason: e.to_string(),
                },
            )?;

        Ok(entries
            .into_iter()
            .map(|(key, entry)| (key, Arc::new(entry)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deps(version: &str) -> BuildDependencies {
        let mut deps = BuildDependencies::new();
        deps.add_marker("splitpack", version);
        deps
    }

    fn layer(keys: &[&str]) -> PackLayer {
        let etag = ContentHash::of(b"etag");
        keys.iter()
            .map(|k| {
                (
                    ContentHash::of(k.as_bytes()),
                    Arc::new(CacheEntry::encode(etag, &k.to_string()).unwrap()),
                )
            })
            .collect()
    }

    #[test]
    fn test_save_and_load_layers_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = PackStore::new(dir.path(), "modules", 8);

        store.save(&deps("1"), &layer(&["a", "b"])).unwrap();
        store.save(&deps("1"), &layer(&["c"])).unwrap();

        let layers = store.load(&deps("1"));
        assert_eq!(layers.len(), 2);
        assert_eq!(layers[0].len(), 2);
        assert_eq!(layers[1].len(), 1);
    }

    #[test]
    fn test_fingerprint_mismatch_discards_namespace() {
        let dir = tempfile::tempdir().unwrap();
        let store = PackStore::new(dir.path(), "modules", 8);
        store.save(&deps("1"), &layer(&["a"])).unwrap();

        assert!(store.load(&deps("2")).is_empty());
        assert!(!store.dir().exists());
        assert!(store.load(&deps("1")).is_empty());
    }

    #[test]
    fn test_corrupt_pack_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = PackStore::new(dir.path(), "modules", 8);
        store.save(&deps("1"), &layer(&["a"])).unwrap();
        store.save(&deps("1"), &layer(&["b"])).unwrap();

        let first = store.dir().join("pack-0.pack");
        let mut bytes = std::fs::read(&first).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        std::fs::write(&first, bytes).unwrap();

        let layers = store.load(&deps("1"));
        assert_eq!(layers.len(), 1);
        assert!(layers[0].contains_key(&ContentHash::of(b"b")));
    }

    #[test]
    fn test_compaction_merges_packs() {
        let dir = tempfile::tempdir().unwrap();
        let store = PackStore::new(dir.path(), "modules", 2);
        store.save(&deps("1"), &layer(&["a"])).unwrap();
        store.save(&deps("1"), &layer(&["b"])).unwrap();
        store.save(&deps("1"), &layer(&["c"])).unwrap();

        let layers = store.load(&deps("1"));
        assert_eq!(layers.len(), 1);
        assert_eq!(layers[0].len(), 3);
        assert!(!store.dir().join("pack-0.pack").exists());
    }
}
