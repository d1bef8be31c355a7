//! Chunk groups: entrypoints and async split points

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use super::ChunkUkey;
use crate::error::BuildError;
use crate::graph::{ModuleId, RuntimeSet};

/// Index of a group in the [`ChunkGraph`](super::ChunkGraph) arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkGroupId(pub u32);

impl ChunkGroupId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ChunkGroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkGroupKind {
    /// Loaded on page start; owns a runtime chunk
    Entrypoint {
        name: String,
        runtime_chunk: ChunkUkey,
        entry_module: ModuleId,
    },

    /// Loaded when `origin` reaches an `import(request)`
    Async {
        origin: ModuleId,
        request: String,
        root_module: ModuleId,
    },
}

/// An ordered set of chunks that must all be loaded before the group runs.
#[derive(Debug, Clone)]
pub struct ChunkGroup {
    pub id: ChunkGroupId,

    pub kind: ChunkGroupKind,

    /// Chunks in load order
    pub chunks: Vec<ChunkUkey>,

    pub parents: BTreeSet<ChunkGroupId>,

    pub children: BTreeSet<ChunkGroupId>,

    /// Entrypoints this group can be loaded from
    pub runtime: RuntimeSet,

    /// Failed modules referenced from this group
    pub errors: Vec<(ModuleId, BuildError)>,

    pre_order: Vec<ModuleId>,
    post_order: Vec<ModuleId>,
    pre_index: HashMap<ModuleId, usize>,
    post_index: HashMap<ModuleId, usize>,
}

impl ChunkGroup {
    pub fn new(id: ChunkGroupId, kind: ChunkGroupKind) -> Self {
        Self {
            id,
            kind,
            chunks: Vec::new(),
            parents: BTreeSet::new(),
            children: BTreeSet::new(),
            runtime: RuntimeSet::new(),
            errors: Vec::new(),
            pre_order: Vec::new(),
            post_order: Vec::new(),
            pre_index: HashMap::new(),
            post_index: HashMap::new(),
        }
    }

    /// Entrypoint name, if this is an entrypoint
    pub fn name(&self) -> Option<&str> {
        match &self.kind {
            ChunkGroupKind::Entrypoint { name, .. } => Some(name),
            ChunkGroupKind::Async { .. } => None,
        }
    }

    /// Module the group's traversal starts from
    pub fn root_module(&self) -> ModuleId {
        match &self.kind {
            ChunkGroupKind::Entrypoint { entry_module, .. } => *entry_module,
            ChunkGroupKind::Async { root_module, .. } => *root_module,
        }
    }

    pub fn runtime_chunk(&self) -> Option<ChunkUkey> {
        match &self.kind {
            ChunkGroupKind::Entrypoint { runtime_chunk, .. } => Some(*runtime_chunk),
            ChunkGroupKind::Async { .. } => None,
        }
    }

    pub fn is_initial(&self) -> bool {
        matches!(self.kind, ChunkGroupKind::Entrypoint { .. })
    }

    /// Whether output may be emitted for this group
    pub fn is_renderable(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, module: ModuleId, error: BuildError) {
        if !self.errors.iter().any(|(m, e)| *m == module && *e == error) {
            self.errors.push((module, error));
        }
    }

    /// Depth-first discovery order, root first
    pub fn pre_order(&self) -> &[ModuleId] {
        &self.pre_order
    }

    /// Dependencies before dependents
    pub fn post_order(&self) -> &[ModuleId] {
        &self.post_order
    }

    pub fn pre_order_index(&self, module: ModuleId) -> Option<usize> {
        self.pre_index.get(&module).copied()
    }

    pub fn post_order_index(&self, module: ModuleId) -> Option<usize> {
        self.post_index.get(&module).copied()
    }

    pub(crate) fn push_pre_order(&mut self, module: ModuleId) {
        self.pre_index.insert(module, self.pre_order.len());
        self.pre_order.push(module);
    }

    pub(crate) fn push_post_order(&mut self, module: ModuleId) {
        self.post_index.insert(module, self.post_order.len());
        self.post_order.push(module);
    }

    /// Place `chunk` right before `before`, or last when `before` is absent
    pub(crate) fn insert_chunk(&mut self, chunk: ChunkUkey, before: Option<ChunkUkey>) -> bool {
        if self.chunks.contains(&chunk) {
            return false;
        }
        let position = before
            .and_then(|b| self.chunks.iter().position(|c| *c == b))
            .unwrap_or(self.chunks.len());
        self.chunks.insert(position, chunk);
        true
    }

    /// Swap `old` for `new`, keeping its position
    pub(crate) fn replace_chunk(&mut self, old: ChunkUkey, new: ChunkUkey) {
        if self.chunks.contains(&new) {
            self.chunks.retain(|c| *c != old);
        } else if let Some(slot) = self.chunks.iter_mut().find(|c| **c == old) {
            *slot = new;
        }
    }

    pub(crate) fn remove_chunk(&mut self, chunk: ChunkUkey) {
        self.chunks.retain(|c| *c != chunk);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group() -> ChunkGroup {
        ChunkGroup::new(
            ChunkGroupId(0),
            ChunkGroupKind::Entrypoint {
                name: "main".to_string(),
                runtime_chunk: ChunkUkey(0),
                entry_module: ModuleId(0),
            },
        )
    }

    #[test]
    fn test_insert_chunk_before() {
        let mut group = group();
        group.insert_chunk(ChunkUkey(0), None);
        group.insert_chunk(ChunkUkey(1), Some(ChunkUkey(0)));
        assert!(!group.insert_chunk(ChunkUkey(1), None));
        assert_eq!(group.chunks, vec![ChunkUkey(1), ChunkUkey(0)]);

        group.replace_chunk(ChunkUkey(0), ChunkUkey(2));
        assert_eq!(group.chunks, vec![ChunkUkey(1), ChunkUkey(2)]);
        group.replace_chunk(ChunkUkey(2), ChunkUkey(1));
        assert_eq!(group.chunks, vec![ChunkUkey(1)]);
    }

    #[test]
    fn test_orders_are_indexed() {
        let mut group = group();
        group.push_pre_order(ModuleId(3));
        group.push_pre_order(ModuleId(1));
        group.push_post_order(ModuleId(1));
        group.push_post_order(ModuleId(3));

        assert_eq!(group.pre_order_index(ModuleId(1)), Some(1));
        assert_eq!(group.post_order_index(ModuleId(1)), Some(0));
        assert_eq!(group.pre_order_index(ModuleId(9)), None);
        assert!(group.is_initial());
        assert!(group.is_renderable());
    }
}
