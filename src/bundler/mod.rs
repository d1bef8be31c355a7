//! Core bundler implementation
//!
//! Drives one build generation end to end: module loading on the scheduler,
//! export usage, chunk graph construction, optimization and id assignment.
//! The bundler owns the layered cache across generations and persists it as
//! packs on request.

mod loader;
mod manifest;

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::cache::{BuildDependencies, EntryCache, PackLayer, PackStore};
use crate::chunk::{assign_ids, build_chunk_graph, ChunkGraph};
use crate::cli::BuildOptions;
use crate::config::Config;
use crate::error::BuildError;
use crate::graph::ModuleGraph;
use crate::hash::ContentHash;
use crate::optimize::{OptimizationContext, PassManager};
use crate::resolver::{FsResolver, ModuleSource};
use crate::scheduler::{
    compute_parallelism, BuildScheduler, BuildStats, GenerationHandle, ModuleProfile,
    ProfileSummary,
};

use loader::{LoadOutcome, ModuleLoader, TaskContext, MODULE_NAMESPACE};

pub use manifest::{ChunkEntry, ChunkManifest, EntrypointManifest, ManifestModule};

/// Modules touched since the last build, by identifier
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub changed: BTreeSet<String>,
    pub removed: BTreeSet<String>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn changed(mut self, identifier: &str) -> Self {
        self.changed.insert(identifier.to_string());
        self
    }

    pub fn removed(mut self, identifier: &str) -> Self {
        self.removed.insert(identifier.to_string());
        self
    }

    /// Translate file-system paths into the identifiers `resolver` hands out
    pub fn from_paths(resolver: &FsResolver, changed: &[PathBuf], removed: &[PathBuf]) -> Self {
        Self {
            changed: changed.iter().map(|p| resolver.identifier_for(p)).collect(),
            removed: removed.iter().map(|p| resolver.identifier_for(p)).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.removed.is_empty()
    }
}

/// Result of a build that ran to completion
#[derive(Debug)]
pub struct BuildResult {
    pub generation: u64,

    pub modules: ModuleGraph,

    pub chunks: ChunkGraph,

    pub stats: BuildStats,

    /// Identifiers of modules no chunk ended up referencing
    pub pruned: Vec<String>,

    pub duration: Duration,

    chunk_overhead: u64,
}

impl BuildResult {
    /// Unrecovered module errors, by identifier
    pub fn errors(&self) -> Vec<(&str, &BuildError)> {
        self.modules
            .modules()
            .flat_map(|m| m.errors.iter().map(move |e| (m.identifier.as_str(), e)))
            .collect()
    }

    /// Failed optional dependencies, by identifier
    pub fn warnings(&self) -> Vec<(&str, &BuildError)> {
        self.modules
            .modules()
            .flat_map(|m| m.warnings.iter().map(move |e| (m.identifier.as_str(), e)))
            .collect()
    }

    pub fn has_errors(&self) -> bool {
        self.modules.errored_modules().next().is_some()
    }

    pub fn manifest(&self) -> ChunkManifest {
        ChunkManifest::new(&self.modules, &self.chunks, self.chunk_overhead)
    }

    /// Module timings, slowest first
    pub fn profiles(&self) -> Vec<ProfileSummary> {
        let mut modules: Vec<_> = self.modules.modules().collect();
        modules.sort_by(|a, b| {
            b.profile
                .total()
                .cmp(&a.profile.total())
                .then_with(|| a.identifier.cmp(&b.identifier))
        });
        modules
            .into_iter()
            .map(|m| ProfileSummary::new(&m.identifier, &m.profile))
            .collect()
    }
}

/// How a build request ended
#[derive(Debug)]
pub enum BuildOutcome {
    Completed(Box<BuildResult>),
    /// The generation was invalidated before the build finished; nothing it
    /// produced was kept
    Superseded { generation: u64 },
}

impl BuildOutcome {
    pub fn completed(self) -> Option<BuildResult> {
        match self {
            BuildOutcome::Completed(result) => Some(*result),
            BuildOutcome::Superseded { .. } => None,
        }
    }

    pub fn is_superseded(&self) -> bool {
        matches!(self, BuildOutcome::Superseded { .. })
    }
}

/// The main bundler
pub struct Bundler {
    /// Project configuration
    config: Arc<Config>,

    /// Build options
    options: BuildOptions,

    source: Arc<dyn ModuleSource>,

    scheduler: BuildScheduler,

    /// `None` when caching is disabled
    cache: Option<Arc<EntryCache>>,

    pack_store: Option<PackStore>,

    build_deps: BuildDependencies,

    etag: ContentHash,

    /// Entries written since the last [`persist`](Self::persist)
    unsaved: PackLayer,

    /// Source digests of the last completed build
    known_digests: HashMap<String, ContentHash>,

    passes: PassManager,
}

impl Bundler {
    /// Create a bundler reading modules from the project directory
    pub fn new(config: Config, options: BuildOptions) -> Result<Self> {
        let source = Arc::new(FsResolver::new(config.root.clone()));
        Self::with_source(config, options, source)
    }

    /// Create a bundler over any module source
    pub fn with_source(
        config: Config,
        options: BuildOptions,
        source: Arc<dyn ModuleSource>,
    ) -> Result<Self> {
        let config = Arc::new(config);
        let passes = PassManager::from_config(&config.optimization)?;
        let scheduler = BuildScheduler::new(config.build.parallelism, config.build.max_retries);
        let build_deps = Self::collect_build_dependencies(&config, source.as_ref());
        let etag = build_deps.fingerprint();

        let caching = options.cache && config.cache.enabled;
        let mut pack_store = None;
        let mut cache = None;
        if caching {
            let store = PackStore::new(&config.cache_dir(), MODULE_NAMESPACE, config.cache.max_packs);
            let mut entries = EntryCache::new();
            for layer in store.load(&build_deps) {
                entries.add_layer(&Arc::new(layer), true);
            }
            debug!("Cache starts with {} layer(s)", entries.layer_count());
            cache = Some(Arc::new(entries));
            pack_store = Some(store);
        }

        Ok(Self {
            config,
            options,
            source,
            scheduler,
            cache,
            pack_store,
            build_deps,
            etag,
            unsaved: PackLayer::new(),
            known_digests: HashMap::new(),
            passes,
        })
    }

    fn collect_build_dependencies(config: &Config, source: &dyn ModuleSource) -> BuildDependencies {
        let mut deps = BuildDependencies::new();
        deps.add_marker("splitpack", env!("CARGO_PKG_VERSION"));
        deps.add_marker("source", source.name());
        for path in config.build_dependency_paths() {
            deps.add_file(&path);
        }
        deps
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Where build artifacts go: `--outdir` or the configured directory
    pub fn output_dir(&self) -> PathBuf {
        self.options
            .outdir
            .clone()
            .unwrap_or_else(|| self.config.output_dir())
    }

    /// Handle for invalidating in-flight work from another task
    pub fn generation_handle(&self) -> GenerationHandle {
        self.scheduler.generations().clone()
    }

    /// Mark the running generation stale. Returns the new generation.
    pub fn invalidate(&self) -> u64 {
        self.scheduler.generations().invalidate()
    }

    /// Cache entries not yet persisted
    pub fn unsaved_entries(&self) -> usize {
        self.unsaved.len()
    }

    /// Sizes of the immutable cache layers, in probe order
    pub fn cache_layers(&self) -> Vec<usize> {
        self.cache
            .as_ref()
            .map(|cache| cache.layer_sizes())
            .unwrap_or_default()
    }

    /// Build from scratch, reading every source again
    pub async fn build(&mut self) -> Result<BuildOutcome> {
        self.known_digests.clear();
        self.run().await
    }

    /// Build after `changes`, trusting the digests of untouched modules
    pub async fn rebuild(&mut self, changes: &ChangeSet) -> Result<BuildOutcome> {
        self.invalidate();
        if let Some(cache) = &self.cache {
            self.cache = Some(Arc::new(cache.next_generation()));
        }
        self.refresh_build_dependencies();

        for identifier in changes.changed.iter().chain(&changes.removed) {
            self.known_digests.remove(identifier);
        }
        debug!(
            "Rebuilding with {} changed and {} removed module(s)",
            changes.changed.len(),
            changes.removed.len()
        );
        self.run().await
    }

    /// Re-hash the build dependencies; a change drops every cached result
    fn refresh_build_dependencies(&mut self) {
        let deps = Self::collect_build_dependencies(&self.config, self.source.as_ref());
        let etag = deps.fingerprint();
        if etag == self.etag {
            return;
        }

        info!("Build dependencies changed, starting with an empty cache");
        if self.cache.is_some() {
            self.cache = Some(Arc::new(EntryCache::new()));
        }
        self.unsaved.clear();
        self.known_digests.clear();
        self.build_deps = deps;
        self.etag = etag;
    }

    async fn run(&mut self) -> Result<BuildOutcome> {
        let start = Instant::now();
        self.scheduler.reset_counters();
        let generation = self.scheduler.generations().current();

        let ctx = Arc::new(TaskContext {
            source: Arc::clone(&self.source),
            cache: self.cache.clone(),
            etag: self.etag,
            counters: Arc::clone(self.scheduler.counters()),
            max_retries: self.scheduler.max_retries(),
        });
        let entries: Vec<(String, String)> = self
            .config
            .entrypoints
            .iter()
            .map(|(name, request)| (name.clone(), request.clone()))
            .collect();

        info!("Building module graph...");
        let mut written = HashMap::new();
        let loaded = ModuleLoader {
            scheduler: &self.scheduler,
            ctx,
            known_digests: &self.known_digests,
            written: &mut written,
        }
        .load(&entries)
        .await?;

        // Entries already sit in the cache overlay; they only await persisting
        self.unsaved.extend(written);

        let mut modules = match loaded {
            LoadOutcome::Loaded(modules) => modules,
            LoadOutcome::Superseded => {
                warn!("Build generation {} was superseded", generation);
                return Ok(BuildOutcome::Superseded { generation });
            }
        };

        let rounds = modules.propagate_usage();
        debug!("Export usage settled after {} round(s)", rounds);

        info!("Generating chunks...");
        let mut chunks = build_chunk_graph(&modules)?;
        let chunk_overhead = self.config.optimization.chunk_overhead;
        self.passes.run(&mut OptimizationContext {
            modules: &modules,
            chunks: &mut chunks,
            chunk_overhead,
        })?;

        let pruned = modules.remove_orphans(&chunks);
        assign_ids(&mut modules, &mut chunks);

        let mut profiles: Vec<&mut ModuleProfile> =
            modules.modules_mut().map(|m| &mut m.profile).collect();
        compute_parallelism(&mut profiles);

        if !self.scheduler.generations().is_current(generation) {
            warn!("Build generation {} was superseded", generation);
            return Ok(BuildOutcome::Superseded { generation });
        }

        self.known_digests = modules
            .modules()
            .filter_map(|m| m.digest.map(|d| (m.identifier.clone(), d)))
            .collect();

        let stats = self.scheduler.counters().snapshot();
        let duration = start.elapsed();
        info!(
            "Built {} module(s) into {} chunk(s) ({} restored, {} built) in {:?}",
            modules.len(),
            chunks.chunk_count(),
            stats.restored,
            stats.built,
            duration
        );

        Ok(BuildOutcome::Completed(Box::new(BuildResult {
            generation,
            modules,
            chunks,
            stats,
            pruned,
            duration,
            chunk_overhead,
        })))
    }

    /// Write the entries gathered since the last call as a new pack.
    /// Returns the number of entries written.
    pub fn persist(&mut self) -> Result<usize> {
        let Some(store) = &self.pack_store else {
            return Ok(0);
        };

        let count = self.unsaved.len();
        store.save(&self.build_deps, &self.unsaved)?;
        self.unsaved.clear();
        debug!("Persisted {} cache entr(ies) to {}", count, store.dir().display());
        Ok(count)
    }

    /// Remove the persisted cache of `config`. Returns whether one existed.
    pub fn clean_cache(config: &Config) -> Result<bool> {
        let dir = config.cache_dir();
        if !dir.exists() {
            return Ok(false);
        }
        fs::remove_dir_all(&dir)
            .with_context(|| format!("Failed to remove cache at {}", dir.display()))?;
        Ok(true)
    }
}
