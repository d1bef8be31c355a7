//! Shared-module extraction
//!
//! Modules contained in more chunks than a cache group's threshold are
//! grouped by the exact set of chunks holding them; each such set is an
//! extraction candidate. The best candidate is moved into a new shared chunk,
//! then all candidates are recomputed, until nothing beneficial remains or
//! the split budget is spent.

use std::cmp::Ordering;
use std::collections::HashMap;

use anyhow::{Context, Result};
use regex::Regex;
use tracing::debug;

use super::{ChunkOptimizationPass, OptimizationContext};
use crate::chunk::{ChunkGraph, ChunkKind, ChunkUkey};
use crate::config::{CacheGroupConfig, ChunkFilter, SplitChunksConfig};
use crate::graph::ModuleId;

/// A compiled extraction policy
#[derive(Debug, Clone)]
pub struct CacheGroup {
    pub name: String,
    test: Option<Regex>,
    pub threshold: usize,
    pub min_size: u64,
    pub chunks: ChunkFilter,
    pub enforce: bool,
}

impl CacheGroup {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            test: None,
            threshold: 1,
            min_size: 0,
            chunks: ChunkFilter::All,
            enforce: false,
        }
    }

    pub fn from_config(config: &CacheGroupConfig) -> Result<Self> {
        let test = config
            .test
            .as_deref()
            .map(Regex::new)
            .transpose()
            .with_context(|| format!("Invalid test pattern for cache group '{}'", config.name))?;
        Ok(Self {
            name: config.name.clone(),
            test,
            threshold: config.threshold,
            min_size: config.min_size,
            chunks: config.chunks,
            enforce: config.enforce,
        })
    }

    pub fn with_test(mut self, pattern: &str) -> Result<Self> {
        self.test = Some(Regex::new(pattern)?);
        Ok(self)
    }

    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_min_size(mut self, min_size: u64) -> Self {
        self.min_size = min_size;
        self
    }

    pub fn with_chunks(mut self, chunks: ChunkFilter) -> Self {
        self.chunks = chunks;
        self
    }

    pub fn enforced(mut self) -> Self {
        self.enforce = true;
        self
    }

    fn matches(&self, identifier: &str) -> bool {
        self.test.as_ref().map_or(true, |re| re.is_match(identifier))
    }

    /// Chunks of `module` this group may extract from. Chunks produced by any
    /// cache group are final, so a module extracted by a higher-priority group
    /// stays there.
    fn eligible_chunks(&self, chunks: &ChunkGraph, module: ModuleId) -> Vec<ChunkUkey> {
        chunks
            .chunks_of_module(module)
            .iter()
            .copied()
            .filter(|ukey| {
                let Some(chunk) = chunks.chunk(*ukey) else {
                    return false;
                };
                if chunk.cache_group.is_some() {
                    return false;
                }
                match self.chunks {
                    ChunkFilter::All => true,
                    ChunkFilter::Initial => chunks.is_initial_chunk(*ukey),
                    ChunkFilter::Async => !chunks.is_initial_chunk(*ukey),
                }
            })
            .collect()
    }
}

/// Modules sharing one chunk set, extractable together
#[derive(Debug)]
struct Candidate {
    group: usize,
    chunks: Vec<ChunkUkey>,
    modules: Vec<ModuleId>,
    size: u64,
    /// Discovery order, the final tie-break
    order: usize,
}

impl Candidate {
    /// Size saved by the extraction: the modules leave every chunk of the
    /// set and a single new chunk is created.
    fn score(&self, overhead: u64) -> i128 {
        (self.chunks.len() as i128 - 1) * self.size as i128 - overhead as i128
    }

    fn merged_size(&self, overhead: u64) -> u64 {
        self.size + overhead
    }
}

/// Extracts modules shared by many chunks into dedicated chunks.
#[derive(Debug, Clone)]
pub struct SplitChunks {
    cache_groups: Vec<CacheGroup>,
    max_splits: usize,
}

impl SplitChunks {
    pub fn new(cache_groups: Vec<CacheGroup>, max_splits: usize) -> Self {
        Self {
            cache_groups,
            max_splits,
        }
    }

    pub fn from_config(config: &SplitChunksConfig) -> Result<Self> {
        let cache_groups = config
            .cache_groups
            .iter()
            .map(CacheGroup::from_config)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(cache_groups, config.max_splits))
    }

    fn collect_candidates(&self, ctx: &OptimizationContext<'_>) -> Vec<Candidate> {
        let mut candidates: Vec<Candidate> = Vec::new();
        let mut index: HashMap<(usize, Vec<ChunkUkey>), usize> = HashMap::new();

        for module in ctx.modules.modules() {
            if ctx.chunks.chunks_of_module(module.id).is_empty() {
                continue;
            }

            // First cache group that wants the module takes it
            for (group_index, group) in self.cache_groups.iter().enumerate() {
                if !group.matches(&module.identifier) {
                    continue;
                }
                let chunks = group.eligible_chunks(ctx.chunks, module.id);
                if chunks.is_empty() || (!group.enforce && chunks.len() <= group.threshold) {
                    continue;
                }

                let key = (group_index, chunks);
                let slot = match index.get(&key) {
                    Some(&slot) => slot,
                    None => {
                        let slot = candidates.len();
                        candidates.push(Candidate {
                            group: group_index,
                            chunks: key.1.clone(),
                            modules: Vec::new(),
                            size: 0,
                            order: slot,
                        });
                        index.insert(key, slot);
                        slot
                    }
                };
                candidates[slot].modules.push(module.id);
                candidates[slot].size += module.size;
                break;
            }
        }

        candidates
    }

    fn best_candidate(&self, candidates: Vec<Candidate>, overhead: u64) -> Option<Candidate> {
        candidates
            .into_iter()
            .filter(|c| {
                let group = &self.cache_groups[c.group];
                group.enforce || (c.size >= group.min_size && c.score(overhead) > 0)
            })
            .min_by(|a, b| compare(a, b, overhead))
    }

    fn extract(&self, ctx: &mut OptimizationContext<'_>, candidate: &Candidate) -> ChunkUkey {
        let group_name = &self.cache_groups[candidate.group].name;
        let name = ctx
            .chunks
            .named_chunk(group_name)
            .is_none()
            .then(|| group_name.clone());

        let shared = ctx.chunks.add_chunk(name, ChunkKind::Shared);
        if let Some(chunk) = ctx.chunks.chunk_mut(shared) {
            chunk.cache_group = Some(group_name.clone());
        }

        for &ukey in &candidate.chunks {
            for &module in &candidate.modules {
                ctx.chunks.disconnect_chunk_and_module(ukey, module);
            }
            let groups = ctx
                .chunks
                .chunk(ukey)
                .map(|c| c.groups.clone())
                .unwrap_or_default();
            for group in groups {
                ctx.chunks.connect_chunk_and_group(shared, group, Some(ukey));
            }
        }
        for &module in &candidate.modules {
            ctx.chunks.connect_chunk_and_module(shared, module);
        }
        shared
    }
}

/// Best first: higher score, then smaller merged chunk, then discovery order
fn compare(a: &Candidate, b: &Candidate, overhead: u64) -> Ordering {
    b.score(overhead)
        .cmp(&a.score(overhead))
        .then_with(|| a.merged_size(overhead).cmp(&b.merged_size(overhead)))
        .then_with(|| a.order.cmp(&b.order))
}

impl ChunkOptimizationPass for SplitChunks {
    fn name(&self) -> &'static str {
        "SplitChunks"
    }

    fn run(&self, ctx: &mut OptimizationContext<'_>) -> Result<bool> {
        let mut splits = 0;

        while splits < self.max_splits {
            let candidates = self.collect_candidates(ctx);
            let Some(best) = self.best_candidate(candidates, ctx.chunk_overhead) else {
                break;
            };

            let shared = self.extract(ctx, &best);
            splits += 1;
            debug!(
                "Extracted {} module(s) ({} bytes) from {} chunk(s) into {} [{}]",
                best.modules.len(),
                best.size,
                best.chunks.len(),
                ctx.chunks
                    .chunk(shared)
                    .map(|c| c.display_name())
                    .unwrap_or_default(),
                self.cache_groups[best.group].name
            );
        }

        Ok(splits > 0)
    }
}
