//! Output chunks

use std::collections::BTreeSet;
use std::fmt;

use super::ChunkGroupId;
use crate::graph::{ModuleId, RuntimeSet};

/// Index of a chunk in the [`ChunkGraph`](super::ChunkGraph) arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkUkey(pub u32);

impl ChunkUkey {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ChunkUkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

/// Type of chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    /// Entry point chunk - loaded immediately
    Entry,
    /// Async chunk - loaded on demand via dynamic import
    Async,
    /// Shared chunk - extracted modules used by several chunks
    Shared,
}

/// A chunk is a group of modules that will be bundled together
#[derive(Debug, Clone)]
pub struct Chunk {
    pub ukey: ChunkUkey,

    /// Chunk name, if it has one
    pub name: Option<String>,

    pub kind: ChunkKind,

    /// Member modules; the chunk owns the membership, not the module
    pub modules: BTreeSet<ModuleId>,

    /// Groups this chunk belongs to
    pub groups: BTreeSet<ChunkGroupId>,

    /// Runtimes (entrypoint names) the chunk is loaded in
    pub runtime: RuntimeSet,

    /// Cache group that extracted this chunk
    pub cache_group: Option<String>,

    /// Stable id assigned after optimization
    pub id: Option<String>,
}

impl Chunk {
    pub fn new(ukey: ChunkUkey, name: Option<String>, kind: ChunkKind) -> Self {
        Self {
            ukey,
            name,
            kind,
            modules: BTreeSet::new(),
            groups: BTreeSet::new(),
            runtime: RuntimeSet::new(),
            cache_group: None,
            id: None,
        }
    }

    /// Check if chunk is empty
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Number of modules in chunk
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn contains(&self, module: ModuleId) -> bool {
        self.modules.contains(&module)
    }

    /// Human-readable label for logs
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => self.ukey.to_string(),
        }
    }
}
