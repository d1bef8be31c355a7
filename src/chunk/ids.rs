//! Deterministic module and chunk ids

use std::collections::HashSet;

use super::ChunkGraph;
use crate::graph::{ModuleGraph, ModuleId};
use crate::hash::{ContentHash, ContentHasher};

const MIN_ID_LENGTH: usize = 4;

/// Shortest prefix of `full` (at least [`MIN_ID_LENGTH`]) not yet taken
fn claim(full: &str, taken: &mut HashSet<String>) -> String {
    let mut len = MIN_ID_LENGTH.min(full.len());
    loop {
        let candidate = &full[..len];
        if len == full.len() || !taken.contains(candidate) {
            let mut id = candidate.to_string();
            // Identical hashes only happen for identical inputs
            let mut suffix = 1;
            while taken.contains(&id) {
                id = format!("{}~{}", candidate, suffix);
                suffix += 1;
            }
            taken.insert(id.clone());
            return id;
        }
        len += 1;
    }
}

/// Assign opaque ids to every live module and chunk.
///
/// Modules get a short digest of their identifier. Named chunks keep their
/// name; the others get a digest of their sorted member identifiers.
pub fn assign_ids(modules: &mut ModuleGraph, chunks: &mut ChunkGraph) {
    let mut ordered: Vec<(String, ModuleId)> = modules
        .modules()
        .map(|m| (m.identifier.clone(), m.id))
        .collect();
    ordered.sort();

    let mut taken = HashSet::new();
    for (identifier, id) in ordered {
        let full = ContentHash::of(identifier.as_bytes()).to_string();
        let module_id = claim(&full, &mut taken);
        if let Some(module) = modules.module_mut(id) {
            module.module_id = Some(module_id);
        }
    }

    let mut taken = HashSet::new();
    let mut unnamed = Vec::new();
    for chunk in chunks.chunks() {
        match &chunk.name {
            Some(name) if taken.insert(name.clone()) => {}
            _ => {
                let mut members: Vec<&str> = chunk
                    .modules
                    .iter()
                    .filter_map(|m| modules.module(*m))
                    .map(|m| m.identifier.as_str())
                    .collect();
                members.sort_unstable();

                let mut hasher = ContentHasher::new();
                for member in members {
                    hasher.field(member.as_bytes());
                }
                unnamed.push((hasher.finalize().to_string(), chunk.ukey));
            }
        }
    }
    unnamed.sort();

    for ukey in chunks.chunk_keys() {
        if let Some(chunk) = chunks.chunk_mut(ukey) {
            chunk.id = chunk.name.clone();
        }
    }
    for (full, ukey) in unnamed {
        let id = claim(&full, &mut taken);
        if let Some(chunk) = chunks.chunk_mut(ukey) {
            chunk.id = Some(id);
        }
    }
}
