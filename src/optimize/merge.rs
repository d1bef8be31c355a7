//! Merging of chunks with identical module sets

use anyhow::Result;
use tracing::debug;

use super::{ChunkOptimizationPass, OptimizationContext};

/// Unifies chunks holding identical module sets.
///
/// Entry chunks are never merged. Chunks from different runtimes are merged
/// only when every shared module is used the same way under both.
pub struct MergeDuplicateChunks;

impl ChunkOptimizationPass for MergeDuplicateChunks {
    fn name(&self) -> &'static str {
        "MergeDuplicateChunks"
    }

    fn run(&self, ctx: &mut OptimizationContext<'_>) -> Result<bool> {
        let mut changed = false;
        let keys = ctx.chunks.chunk_keys();

        for (i, &target) in keys.iter().enumerate() {
            if ctx.chunks.is_entry_chunk(target) {
                continue;
            }

            for &other in &keys[i + 1..] {
                if ctx.chunks.is_entry_chunk(other) {
                    continue;
                }
                let (Some(a), Some(b)) = (ctx.chunks.chunk(target), ctx.chunks.chunk(other)) else {
                    continue;
                };
                if a.is_empty() || a.modules != b.modules {
                    continue;
                }

                if a.runtime != b.runtime {
                    let equally_used = a.modules.iter().all(|m| {
                        ctx.modules
                            .exports_info(*m)
                            .map_or(true, |e| e.is_equally_used(&a.runtime, &b.runtime))
                    });
                    if !equally_used {
                        continue;
                    }
                }

                debug!(
                    "Merging duplicate chunk {} into {}",
                    b.display_name(),
                    a.display_name()
                );
                ctx.chunks.merge_chunk_into(target, other);
                changed = true;
            }
        }

        Ok(changed)
    }
}
