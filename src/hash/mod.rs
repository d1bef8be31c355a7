//! Content hashing
//!
//! Stable, platform independent digests used as cache keys and change
//! detection tokens.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Width of a [`ContentHash`] in bytes.
pub const HASH_WIDTH: usize = 16;

/// A fixed-width content digest, rendered as lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentHash([u8; HASH_WIDTH]);

impl ContentHash {
    /// Digest a complete byte slice in one call
    pub fn of(bytes: &[u8]) -> Self {
        let mut hasher = ContentHasher::new();
        hasher.update(bytes);
        hasher.finalize()
    }

    /// Raw digest bytes
    pub fn as_bytes(&self) -> &[u8; HASH_WIDTH] {
        &self.0
    }

    /// Leading `len` hex characters, used for short ids
    pub fn short(&self, len: usize) -> String {
        let full = self.to_string();
        full[..len.min(full.len())].to_string()
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self)
    }
}

impl FromStr for ContentHash {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; HASH_WIDTH];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }
}

/// Streaming hasher: `new`, any number of `update` calls, then `finalize`.
#[derive(Clone, Default)]
pub struct ContentHasher {
    inner: Sha256,
}

impl ContentHasher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes
    pub fn update(&mut self, bytes: &[u8]) -> &mut Self {
        self.inner.update(bytes);
        self
    }

    /// Feed a length-prefixed field, so that `("ab", "c")` and `("a", "bc")`
    /// produce different digests.
    pub fn field(&mut self, bytes: &[u8]) -> &mut Self {
        self.inner.update((bytes.len() as u64).to_le_bytes());
        self.inner.update(bytes);
        self
    }

    pub fn finalize(self) -> ContentHash {
        let result = self.inner.finalize();
        let mut bytes = [0u8; HASH_WIDTH];
        bytes.copy_from_slice(&result[..HASH_WIDTH]);
        ContentHash(bytes)
    }
}
