//! Removal of chunks left without modules

use anyhow::Result;
use tracing::trace;

use super::{ChunkOptimizationPass, OptimizationContext};

/// Drops chunks left without modules, except entry chunks.
pub struct RemoveEmptyChunks;

impl ChunkOptimizationPass for RemoveEmptyChunks {
    fn name(&self) -> &'static str {
        "RemoveEmptyChunks"
    }

    fn run(&self, ctx: &mut OptimizationContext<'_>) -> Result<bool> {
        let empty: Vec<_> = ctx
            .chunks
            .chunks()
            .filter(|c| c.is_empty())
            .map(|c| c.ukey)
            .filter(|ukey| !ctx.chunks.is_entry_chunk(*ukey))
            .collect();

        for ukey in &empty {
            trace!("Removing empty chunk {}", ukey);
            ctx.chunks.remove_chunk(*ukey);
        }
        Ok(!empty.is_empty())
    }
}
