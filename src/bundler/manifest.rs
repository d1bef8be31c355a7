//! Chunk manifest handed to the templating layer

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::chunk::{Chunk, ChunkGraph, ChunkGroup, ChunkKind};
use crate::graph::{ModuleGraph, ModuleId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkManifest {
    pub entrypoints: BTreeMap<String, EntrypointManifest>,
    pub chunks: Vec<ChunkEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntrypointManifest {
    /// Chunk ids in load order
    pub chunks: Vec<String>,
    /// Chunk ids loaded on demand below this entrypoint
    pub async_chunks: Vec<String>,
    pub renderable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkEntry {
    pub id: String,
    pub name: Option<String>,
    pub kind: &'static str,
    pub initial: bool,
    pub size: u64,
    pub runtime: Vec<String>,
    /// Members in initialization order
    pub modules: Vec<ManifestModule>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestModule {
    pub id: String,
    pub identifier: String,
    pub size: u64,
}

fn chunk_id(chunk: &Chunk) -> String {
    chunk.id.clone().unwrap_or_else(|| chunk.ukey.to_string())
}

/// Members of `chunk`, dependencies first per the post-order of its groups
fn initialization_order(chunk: &Chunk, chunks: &ChunkGraph) -> Vec<ModuleId> {
    let mut seen = HashSet::new();
    let mut order = Vec::with_capacity(chunk.len());
    for group in chunk.groups.iter().filter_map(|g| chunks.group(*g)) {
        for module in group.post_order() {
            if chunk.contains(*module) && seen.insert(*module) {
                order.push(*module);
            }
        }
    }
    // Members no group traversal reached, e.g. after merges
    order.extend(chunk.modules.iter().copied().filter(|m| seen.insert(*m)));
    order
}

impl ChunkManifest {
    pub fn new(modules: &ModuleGraph, chunks: &ChunkGraph, chunk_overhead: u64) -> Self {
        let entries = chunks
            .chunks()
            .map(|chunk| ChunkEntry {
                id: chunk_id(chunk),
                name: chunk.name.clone(),
                kind: match chunk.kind {
                    ChunkKind::Entry => "entry",
                    ChunkKind::Async => "async",
                    ChunkKind::Shared => "shared",
                },
                initial: chunks.is_initial_chunk(chunk.ukey),
                size: chunks.chunk_size(chunk.ukey, modules, chunk_overhead),
                runtime: chunk.runtime.iter().cloned().collect(),
                modules: initialization_order(chunk, chunks)
                    .into_iter()
                    .filter_map(|m| modules.module(m))
                    .map(|m| ManifestModule {
                        id: m.module_id.clone().unwrap_or_else(|| m.id.to_string()),
                        identifier: m.identifier.clone(),
                        size: m.size,
                    })
                    .collect(),
            })
            .collect();

        let mut entrypoints = BTreeMap::new();
        for group in chunks.groups().filter(|g| g.is_initial()) {
            let Some(name) = group.name() else {
                continue;
            };
            let ids = |group: &ChunkGroup| -> Vec<String> {
                group
                    .chunks
                    .iter()
                    .filter_map(|c| chunks.chunk(*c))
                    .map(chunk_id)
                    .collect()
            };

            let mut async_chunks = Vec::new();
            let mut seen_groups = HashSet::from([group.id]);
            let mut queue: VecDeque<_> = group.children.iter().copied().collect();
            while let Some(child) = queue.pop_front() {
                if !seen_groups.insert(child) {
                    continue;
                }
                if let Some(child) = chunks.group(child) {
                    for id in ids(child) {
                        if !async_chunks.contains(&id) {
                            async_chunks.push(id);
                        }
                    }
                    queue.extend(child.children.iter().copied());
                }
            }

            entrypoints.insert(
                name.to_string(),
                EntrypointManifest {
                    chunks: ids(group),
                    async_chunks,
                    renderable: group.is_renderable(),
                },
            );
        }

        Self {
            entrypoints,
            chunks: entries,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write the manifest as `manifest.json` into `dir`
    pub fn write(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir).context("Failed to create output directory")?;
        let path = dir.join("manifest.json");
        fs::write(&path, self.to_json()?)
            .with_context(|| format!("Failed to write {}", path.display()))
    }
}
