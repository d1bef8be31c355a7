//! Removal of modules already loaded by every parent group

use std::collections::{BTreeSet, HashMap};

use anyhow::Result;
use tracing::trace;

use super::{ChunkOptimizationPass, OptimizationContext};
use crate::chunk::ChunkGroupId;
use crate::graph::ModuleId;

/// Drops modules from non-initial chunks when every path to the chunk has
/// already loaded them.
pub struct RemoveAvailableModules;

impl ChunkOptimizationPass for RemoveAvailableModules {
    fn name(&self) -> &'static str {
        "RemoveAvailableModules"
    }

    fn run(&self, ctx: &mut OptimizationContext<'_>) -> Result<bool> {
        let chunks = &*ctx.chunks;

        // available(g) = intersection over parents p of (modules(p) | available(p))
        let mut available: HashMap<ChunkGroupId, BTreeSet<ModuleId>> = HashMap::new();
        for id in chunks.topological_groups()? {
            let Some(group) = chunks.group(id) else {
                continue;
            };

            let mut result: Option<BTreeSet<ModuleId>> = None;
            for parent in &group.parents {
                let Some(parent_group) = chunks.group(*parent) else {
                    continue;
                };
                let mut loaded = available.get(parent).cloned().unwrap_or_default();
                for ukey in &parent_group.chunks {
                    if let Some(chunk) = chunks.chunk(*ukey) {
                        loaded.extend(chunk.modules.iter().copied());
                    }
                }
                result = Some(match result {
                    Some(acc) => acc.intersection(&loaded).copied().collect(),
                    None => loaded,
                });
            }
            available.insert(id, result.unwrap_or_default());
        }

        let mut removals = Vec::new();
        for chunk in chunks.chunks() {
            if chunks.is_initial_chunk(chunk.ukey) || chunk.groups.is_empty() {
                continue;
            }
            for module in &chunk.modules {
                let everywhere = chunk
                    .groups
                    .iter()
                    .all(|g| available.get(g).is_some_and(|set| set.contains(module)));
                if everywhere {
                    removals.push((chunk.ukey, *module));
                }
            }
        }

        for (ukey, module) in &removals {
            trace!("Module {} already available for chunk {}", module, ukey);
            ctx.chunks.disconnect_chunk_and_module(*ukey, *module);
        }
        Ok(!removals.is_empty())
    }
}
