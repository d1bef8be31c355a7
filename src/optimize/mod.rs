//! Chunk optimization passes
//!
//! Passes run in registration order over the chunk graph, each through the
//! single [`ChunkOptimizationPass::run`] entry point.

mod available;
mod empty;
mod merge;
mod split_chunks;

use anyhow::{Context, Result};
use tracing::debug;

pub use available::RemoveAvailableModules;
pub use empty::RemoveEmptyChunks;
pub use merge::MergeDuplicateChunks;
pub use split_chunks::{CacheGroup, SplitChunks};

use crate::chunk::{ChunkGraph, ChunkUkey};
use crate::config::OptimizationConfig;
use crate::graph::ModuleGraph;

/// What a pass may see and change
pub struct OptimizationContext<'a> {
    /// Settled module graph, read-only during optimization
    pub modules: &'a ModuleGraph,

    pub chunks: &'a mut ChunkGraph,

    /// Fixed size estimate added to every chunk
    pub chunk_overhead: u64,
}

impl OptimizationContext<'_> {
    pub fn chunk_size(&self, ukey: ChunkUkey) -> u64 {
        self.chunks.chunk_size(ukey, self.modules, self.chunk_overhead)
    }
}

/// One step of chunk graph optimization
pub trait ChunkOptimizationPass: Send + Sync {
    /// Pass name for logging and debugging
    fn name(&self) -> &'static str;

    /// Apply the pass. Returns whether the chunk graph changed.
    fn run(&self, ctx: &mut OptimizationContext<'_>) -> Result<bool>;
}

/// Ordered list of passes
#[derive(Default)]
pub struct PassManager {
    passes: Vec<Box<dyn ChunkOptimizationPass>>,
}

impl PassManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// The passes enabled by `config`, in their required order
    pub fn from_config(config: &OptimizationConfig) -> Result<Self> {
        let mut manager = Self::new();
        if config.remove_available_modules {
            manager.register(Box::new(RemoveAvailableModules));
        }
        if config.merge_duplicate_chunks {
            manager.register(Box::new(MergeDuplicateChunks));
        }
        if config.split_chunks.enabled {
            manager.register(Box::new(SplitChunks::from_config(&config.split_chunks)?));
        }
        if config.remove_empty_chunks {
            manager.register(Box::new(RemoveEmptyChunks));
        }
        Ok(manager)
    }

    /// Register a pass after the existing ones
    pub fn register(&mut self, pass: Box<dyn ChunkOptimizationPass>) {
        self.passes.push(pass);
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    /// Run every pass once, then re-derive chunk runtimes and check the
    /// graph invariants.
    pub fn run(&self, ctx: &mut OptimizationContext<'_>) -> Result<()> {
        for pass in &self.passes {
            let changed = pass
                .run(ctx)
                .with_context(|| format!("Optimization pass '{}' failed", pass.name()))?;
            debug!("Pass {}: {}", pass.name(), if changed { "changed" } else { "no change" });
        }

        ctx.chunks.propagate_runtimes()?;
        ctx.chunks
            .validate()
            .context("Chunk optimization broke an invariant")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_pass_order() {
        let manager = PassManager::from_config(&OptimizationConfig::default()).unwrap();
        assert_eq!(
            manager.names(),
            vec!["MergeDuplicateChunks", "SplitChunks", "RemoveEmptyChunks"]
        );

        let config = OptimizationConfig {
            remove_available_modules: true,
            ..Default::default()
        };
        let manager = PassManager::from_config(&config).unwrap();
        assert_eq!(manager.names()[0], "RemoveAvailableModules");
    }
}
