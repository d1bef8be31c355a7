//! Chunk graph
//!
//! Chunks and chunk groups live in arenas owned by [`ChunkGraph`]; modules
//! are referenced by [`ModuleId`] into the [`ModuleGraph`]. The
//! module-to-chunk index is kept in sync by the connect/disconnect methods,
//! which are the only way to change chunk membership.

mod builder;
#[allow(clippy::module_inception)]
mod chunk;
mod group;
mod ids;

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use anyhow::{bail, Result};

pub use builder::build_chunk_graph;
pub use chunk::{Chunk, ChunkKind, ChunkUkey};
pub use group::{ChunkGroup, ChunkGroupId, ChunkGroupKind};
pub use ids::assign_ids;

use crate::graph::{ModuleGraph, ModuleId, RuntimeSet};

/// The chunk graph
#[derive(Debug, Default)]
pub struct ChunkGraph {
    chunks: Vec<Option<Chunk>>,

    groups: Vec<ChunkGroup>,

    module_chunks: HashMap<ModuleId, BTreeSet<ChunkUkey>>,
}

impl ChunkGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_chunk(&mut self, name: Option<String>, kind: ChunkKind) -> ChunkUkey {
        let ukey = ChunkUkey(self.chunks.len() as u32);
        self.chunks.push(Some(Chunk::new(ukey, name, kind)));
        ukey
    }

    pub fn add_group(&mut self, kind: ChunkGroupKind) -> ChunkGroupId {
        let id = ChunkGroupId(self.groups.len() as u32);
        self.groups.push(ChunkGroup::new(id, kind));
        id
    }

    pub fn chunk(&self, ukey: ChunkUkey) -> Option<&Chunk> {
        self.chunks.get(ukey.index()).and_then(Option::as_ref)
    }

    pub fn chunk_mut(&mut self, ukey: ChunkUkey) -> Option<&mut Chunk> {
        self.chunks.get_mut(ukey.index()).and_then(Option::as_mut)
    }

    pub fn group(&self, id: ChunkGroupId) -> Option<&ChunkGroup> {
        self.groups.get(id.index())
    }

    pub fn group_mut(&mut self, id: ChunkGroupId) -> Option<&mut ChunkGroup> {
        self.groups.get_mut(id.index())
    }

    /// Live chunks in creation order
    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.iter().filter_map(Option::as_ref)
    }

    pub fn chunk_keys(&self) -> Vec<ChunkUkey> {
        self.chunks().map(|c| c.ukey).collect()
    }

    pub fn groups(&self) -> impl Iterator<Item = &ChunkGroup> {
        self.groups.iter()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks().count()
    }

    /// Look up a chunk by name
    pub fn named_chunk(&self, name: &str) -> Option<&Chunk> {
        self.chunks().find(|c| c.name.as_deref() == Some(name))
    }

    /// The group of entrypoint `name`
    pub fn entrypoint(&self, name: &str) -> Option<&ChunkGroup> {
        self.groups().find(|g| g.name() == Some(name))
    }

    /// Chunks containing `module`
    pub fn chunks_of_module(&self, module: ModuleId) -> &BTreeSet<ChunkUkey> {
        static EMPTY: BTreeSet<ChunkUkey> = BTreeSet::new();
        self.module_chunks.get(&module).unwrap_or(&EMPTY)
    }

    pub fn connect_chunk_and_module(&mut self, ukey: ChunkUkey, module: ModuleId) -> bool {
        let Some(chunk) = self.chunks.get_mut(ukey.index()).and_then(Option::as_mut) else {
            return false;
        };
        if !chunk.modules.insert(module) {
            return false;
        }
        self.module_chunks.entry(module).or_default().insert(ukey);
        true
    }

    pub fn disconnect_chunk_and_module(&mut self, ukey: ChunkUkey, module: ModuleId) -> bool {
        let Some(chunk) = self.chunks.get_mut(ukey.index()).and_then(Option::as_mut) else {
            return false;
        };
        if !chunk.modules.remove(&module) {
            return false;
        }
        if let Some(set) = self.module_chunks.get_mut(&module) {
            set.remove(&ukey);
            if set.is_empty() {
                self.module_chunks.remove(&module);
            }
        }
        true
    }

    /// Add `ukey` to `group`, before `before` if given
    pub fn connect_chunk_and_group(
        &mut self,
        ukey: ChunkUkey,
        group: ChunkGroupId,
        before: Option<ChunkUkey>,
    ) {
        let runtime = match self.groups.get_mut(group.index()) {
            Some(g) => {
                g.insert_chunk(ukey, before);
                g.runtime.clone()
            }
            None => return,
        };
        if let Some(chunk) = self.chunk_mut(ukey) {
            chunk.groups.insert(group);
            chunk.runtime.extend(runtime);
        }
    }

    /// Link `parent -> child`. Fails if the link would close a cycle.
    pub fn link_groups(&mut self, parent: ChunkGroupId, child: ChunkGroupId) -> Result<()> {
        if parent == child || self.is_ancestor(child, parent) {
            bail!(
                "Linking chunk group {} -> {} would create a cycle",
                parent,
                child
            );
        }
        self.groups[parent.index()].children.insert(child);
        self.groups[child.index()].parents.insert(parent);
        Ok(())
    }

    /// Whether `ancestor` is reachable from `group` through parent links
    pub fn is_ancestor(&self, ancestor: ChunkGroupId, group: ChunkGroupId) -> bool {
        let mut queue: VecDeque<ChunkGroupId> = VecDeque::from([group]);
        let mut seen = HashSet::from([group]);
        while let Some(current) = queue.pop_front() {
            for &parent in &self.groups[current.index()].parents {
                if parent == ancestor {
                    return true;
                }
                if seen.insert(parent) {
                    queue.push_back(parent);
                }
            }
        }
        false
    }

    /// Whether any group containing the chunk is an entrypoint
    pub fn is_initial_chunk(&self, ukey: ChunkUkey) -> bool {
        self.chunk(ukey).is_some_and(|c| {
            c.groups
                .iter()
                .any(|g| self.groups[g.index()].is_initial())
        })
    }

    /// Whether the chunk owns an entrypoint
    pub fn is_entry_chunk(&self, ukey: ChunkUkey) -> bool {
        self.chunk(ukey).is_some_and(|c| c.kind == ChunkKind::Entry)
            || self.groups().any(|g| g.runtime_chunk() == Some(ukey))
    }

    /// Sum of member module sizes
    pub fn modules_size<'a>(
        modules: &ModuleGraph,
        members: impl IntoIterator<Item = &'a ModuleId>,
    ) -> u64 {
        members
            .into_iter()
            .filter_map(|m| modules.module(*m))
            .map(|m| m.size)
            .sum()
    }

    /// Estimated size: member sizes plus a fixed per-chunk overhead
    pub fn chunk_size(&self, ukey: ChunkUkey, modules: &ModuleGraph, overhead: u64) -> u64 {
        self.chunk(ukey)
            .map(|c| Self::modules_size(modules, &c.modules) + overhead)
            .unwrap_or(0)
    }

    /// Fold `other` into `target`: group memberships move over, `other` is
    /// removed. Module sets are expected to be identical.
    pub fn merge_chunk_into(&mut self, target: ChunkUkey, other: ChunkUkey) {
        let Some(removed) = self.chunks.get_mut(other.index()).and_then(Option::take) else {
            return;
        };
        for module in &removed.modules {
            if let Some(set) = self.module_chunks.get_mut(module) {
                set.remove(&other);
            }
        }
        for module in removed.modules.iter().copied() {
            self.connect_chunk_and_module(target, module);
        }
        for group in &removed.groups {
            self.groups[group.index()].replace_chunk(other, target);
        }
        if let Some(chunk) = self.chunk_mut(target) {
            chunk.groups.extend(removed.groups.iter().copied());
            chunk.runtime.extend(removed.runtime);
        }
    }

    /// Remove a chunk with all its memberships
    pub fn remove_chunk(&mut self, ukey: ChunkUkey) -> Option<Chunk> {
        let chunk = self.chunks.get_mut(ukey.index())?.take()?;
        for module in &chunk.modules {
            if let Some(set) = self.module_chunks.get_mut(module) {
                set.remove(&ukey);
                if set.is_empty() {
                    self.module_chunks.remove(module);
                }
            }
        }
        for group in &chunk.groups {
            self.groups[group.index()].remove_chunk(ukey);
        }
        Some(chunk)
    }

    /// Runtime union of the given groups
    pub fn runtime_of(&self, groups: &BTreeSet<ChunkGroupId>) -> RuntimeSet {
        groups
            .iter()
            .flat_map(|g| self.groups[g.index()].runtime.iter().cloned())
            .collect()
    }

    /// Groups in an order where parents precede children
    pub fn topological_groups(&self) -> Result<Vec<ChunkGroupId>> {
        let mut pending: Vec<usize> = self.groups.iter().map(|g| g.parents.len()).collect();
        let mut queue: VecDeque<ChunkGroupId> = self
            .groups
            .iter()
            .filter(|g| g.parents.is_empty())
            .map(|g| g.id)
            .collect();
        let mut order = Vec::with_capacity(self.groups.len());

        while let Some(id) = queue.pop_front() {
            order.push(id);
            for child in &self.groups[id.index()].children {
                pending[child.index()] -= 1;
                if pending[child.index()] == 0 {
                    queue.push_back(*child);
                }
            }
        }

        if order.len() != self.groups.len() {
            bail!("Chunk group graph contains a cycle");
        }
        Ok(order)
    }

    /// Check the structural invariants. Violations are logic errors.
    pub fn validate(&self) -> Result<()> {
        self.topological_groups()?;

        for group in &self.groups {
            for child in &group.children {
                if !self.groups[child.index()].parents.contains(&group.id) {
                    bail!("Chunk group {} lists child {} without back link", group.id, child);
                }
            }
            for ukey in &group.chunks {
                match self.chunk(*ukey) {
                    Some(chunk) if chunk.groups.contains(&group.id) => {}
                    _ => bail!("Chunk group {} references stale chunk {}", group.id, ukey),
                }
            }
        }

        for chunk in self.chunks() {
            for module in &chunk.modules {
                if !self.chunks_of_module(*module).contains(&chunk.ukey) {
                    bail!("Module index out of sync for {} in {}", module, chunk.ukey);
                }
            }
        }
        Ok(())
    }
}
