//! Incremental build cache
//!
//! Content-addressed entries held in a [`LayeredCache`], optionally persisted
//! as pack files between runs.

mod entry;
mod error;
mod layered;
mod pack;

use std::sync::Arc;

pub use entry::{cache_key, BuildDependencies, CacheEntry, ENTRY_FORMAT_VERSION};
pub use error::CacheError;
pub use layered::LayeredCache;
pub use pack::{PackIndex, PackLayer, PackStore};

use crate::hash::ContentHash;

/// The store used by the bundler: digest keys, shared entries.
pub type EntryCache = LayeredCache<ContentHash, Arc<CacheEntry>>;
