//! Module loading: per-module tasks and their ordered integration
//!
//! A module task reads the source (factory), probes the cache (restoring),
//! builds on a miss (building) and resolves the dependency requests. Tasks
//! run on the scheduler in parallel; [`ModuleLoader::load`] joins them in
//! discovery order and is the only code that touches the module graph.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use tracing::{debug, trace, warn};

use crate::cache::{cache_key, CacheEntry, EntryCache};
use crate::error::BuildError;
use crate::graph::{Module, ModuleGraph};
use crate::hash::ContentHash;
use crate::resolver::{BuiltModule, ModuleSource, SourceFile};
use crate::scheduler::{with_retries, BuildCounters, BuildScheduler, ModuleProfile, Task};

/// Cache namespace of built modules
pub(crate) const MODULE_NAMESPACE: &str = "module";

/// Shared, read-only inputs of every module task
pub(crate) struct TaskContext {
    pub source: Arc<dyn ModuleSource>,
    /// `None` when caching is disabled
    pub cache: Option<Arc<EntryCache>>,
    /// Fingerprint of the build dependencies
    pub etag: ContentHash,
    pub counters: Arc<BuildCounters>,
    pub max_retries: u32,
}

/// What a module task hands back for integration
pub(crate) struct ModuleOutcome {
    pub digest: Option<ContentHash>,
    pub built: Result<BuiltModule, BuildError>,
    /// One entry per dependency record, in declaration order
    pub resolved: Vec<Result<String, BuildError>>,
    /// Written only if the outcome is integrated
    pub cache_write: Option<(ContentHash, Arc<CacheEntry>)>,
    pub profile: ModuleProfile,
}

impl ModuleOutcome {
    fn failed(error: BuildError, profile: ModuleProfile) -> Self {
        Self {
            digest: None,
            built: Err(error),
            resolved: Vec::new(),
            cache_write: None,
            profile,
        }
    }
}

async fn read_source(
    ctx: &TaskContext,
    identifier: &str,
    profile: &mut ModuleProfile,
) -> Result<SourceFile, BuildError> {
    let start = Instant::now();
    BuildCounters::bump(&ctx.counters.factory);
    let (result, retries) = with_retries(ctx.max_retries, || ctx.source.read(identifier)).await;
    note_retries(ctx, profile, retries);
    profile.factory += start.elapsed();
    result
}

fn note_retries(ctx: &TaskContext, profile: &mut ModuleProfile, retries: u32) {
    profile.retries += retries;
    ctx.counters
        .retries
        .fetch_add(retries as usize, Ordering::Relaxed);
}

/// Run one module through factory, restore/build and dependency resolution.
///
/// With `known_digest` the source is assumed unchanged since the digest was
/// taken and is only read again on a cache miss.
pub(crate) async fn run_module_task(
    ctx: Arc<TaskContext>,
    identifier: String,
    known_digest: Option<ContentHash>,
) -> ModuleOutcome {
    let mut profile = ModuleProfile {
        started: Some(Instant::now()),
        ..Default::default()
    };

    let mut file = None;
    let digest = match known_digest {
        Some(digest) => digest,
        None => match read_source(&ctx, &identifier, &mut profile).await {
            Ok(source) => {
                let digest = source.digest;
                file = Some(source);
                digest
            }
            Err(e) => return ModuleOutcome::failed(e, profile),
        },
    };

    let restored = ctx.cache.as_ref().and_then(|cache| {
        let start = Instant::now();
        let key = cache_key(MODULE_NAMESPACE, &identifier, &digest);
        let hit = cache
            .get(&key)
            .and_then(|entry| entry.decode::<BuiltModule>(&ctx.etag));
        profile.restoring = start.elapsed();
        hit
    });

    let (digest, built, cache_write) = match restored {
        Some(built) => {
            trace!("Restored {} from cache", identifier);
            BuildCounters::bump(&ctx.counters.restored);
            (digest, Ok(built), None)
        }
        None => {
            let file = match file {
                Some(file) => file,
                None => match read_source(&ctx, &identifier, &mut profile).await {
                    Ok(file) => file,
                    Err(e) => return ModuleOutcome::failed(e, profile),
                },
            };

            let start = Instant::now();
            BuildCounters::bump(&ctx.counters.built);
            let (result, retries) =
                with_retries(ctx.max_retries, || ctx.source.build(&identifier, &file)).await;
            note_retries(&ctx, &mut profile, retries);
            profile.building = start.elapsed();

            let cache_write = match (&result, &ctx.cache) {
                (Ok(built), Some(_)) => match CacheEntry::encode(ctx.etag, built) {
                    Ok(entry) => Some((
                        cache_key(MODULE_NAMESPACE, &identifier, &file.digest),
                        Arc::new(entry),
                    )),
                    Err(e) => {
                        warn!("Not caching {}: {}", identifier, e);
                        None
                    }
                },
                _ => None,
            };
            (file.digest, result, cache_write)
        }
    };

    let mut resolved = Vec::new();
    if let Ok(built) = &built {
        let start = Instant::now();
        for record in &built.dependencies {
            BuildCounters::bump(&ctx.counters.factory);
            let (result, retries) = with_retries(ctx.max_retries, || {
                ctx.source.resolve(&record.request, Some(&identifier))
            })
            .await;
            note_retries(&ctx, &mut profile, retries);
            resolved.push(result);
        }
        profile.factory += start.elapsed();
    }

    profile.finished = Some(Instant::now());
    ModuleOutcome {
        digest: Some(digest),
        built,
        resolved,
        cache_write,
        profile,
    }
}

/// Result of loading one generation
pub(crate) enum LoadOutcome {
    Loaded(ModuleGraph),
    /// The generation went stale while loading
    Superseded,
}

/// Drives module tasks for one build generation.
pub(crate) struct ModuleLoader<'a> {
    pub scheduler: &'a BuildScheduler,
    pub ctx: Arc<TaskContext>,
    /// Digests trusted to be current, by identifier
    pub known_digests: &'a HashMap<String, ContentHash>,
    /// Cache entries written by integrated tasks
    pub written: &'a mut HashMap<ContentHash, Arc<CacheEntry>>,
}

impl ModuleLoader<'_> {
    fn schedule(&self, identifier: &str) -> Task<ModuleOutcome> {
        let ctx = Arc::clone(&self.ctx);
        let known = self.known_digests.get(identifier).copied();
        let identifier = identifier.to_string();
        self.scheduler
            .schedule(async move { run_module_task(ctx, identifier, known).await })
    }

    /// Build the module graph reachable from `entries`, in their order.
    pub async fn load(&mut self, entries: &[(String, String)]) -> Result<LoadOutcome> {
        let generation = self.scheduler.generations().current();
        let mut graph = ModuleGraph::new();
        let mut scheduled: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<(String, Task<ModuleOutcome>)> = VecDeque::new();

        for (name, request) in entries {
            BuildCounters::bump(&self.ctx.counters.factory);
            let (resolved, _) = with_retries(self.ctx.max_retries, || {
                self.ctx.source.resolve(request, None)
            })
            .await;

            match resolved {
                Ok(identifier) => {
                    let id = graph.add_module(Module::pending(identifier.as_str()));
                    graph.add_entry(name, id);
                    if scheduled.insert(identifier.clone()) {
                        let task = self.schedule(&identifier);
                        queue.push_back((identifier, task));
                    }
                }
                Err(e) => {
                    warn!("Entrypoint '{}' failed to resolve: {}", name, e);
                    let mut module = Module::pending(request.as_str());
                    module.errors.push(e);
                    let id = graph.add_module(module);
                    graph.add_entry(name, id);
                }
            }
        }

        while let Some((identifier, task)) = queue.pop_front() {
            let Some(outcome) = task.join(self.scheduler).await? else {
                debug!("Generation {} superseded while loading", generation);
                return Ok(LoadOutcome::Superseded);
            };

            let start = Instant::now();
            let discovered = self.integrate(&mut graph, &identifier, outcome, generation);
            for target in discovered {
                if scheduled.insert(target.clone()) {
                    let task = self.schedule(&target);
                    queue.push_back((target, task));
                }
            }

            if let Some(module) = graph
                .module_id(&identifier)
                .and_then(|id| graph.module_mut(id))
            {
                module.profile.integration = start.elapsed();
            }
            BuildCounters::bump(&self.ctx.counters.integrated);
        }

        Ok(LoadOutcome::Loaded(graph))
    }

    /// Merge one task outcome into the graph. Returns the identifiers of the
    /// dependencies it references, in declaration order.
    fn integrate(
        &mut self,
        graph: &mut ModuleGraph,
        identifier: &str,
        outcome: ModuleOutcome,
        generation: u64,
    ) -> Vec<String> {
        let id = graph.add_module(Module::pending(identifier));
        let mut discovered = Vec::new();

        let built = match outcome.built {
            Ok(built) => built,
            Err(e) => {
                debug!("Module {} failed: {}", identifier, e);
                if let Some(module) = graph.module_mut(id) {
                    module.digest = outcome.digest;
                    module.profile = outcome.profile;
                    module.errors.push(e);
                }
                return discovered;
            }
        };

        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        for (record, resolved) in built.dependencies.iter().zip(outcome.resolved) {
            match resolved {
                Ok(target) => {
                    let target_id = graph.add_module(Module::pending(target.as_str()));
                    graph.add_connection(id, target_id, record);
                    discovered.push(target);
                }
                Err(e) if record.is_optional => warnings.push(e),
                Err(e) => errors.push(e),
            }
        }

        if let Some(module) = graph.module_mut(id) {
            module.set_kind(built.kind);
            module.size = built.size;
            module.digest = outcome.digest;
            module.dependencies = built.dependencies;
            module.profile = outcome.profile;
            module.errors = errors;
            module.warnings = warnings;
        }

        if let (Some(cache), Some((key, entry))) = (&self.ctx.cache, outcome.cache_write) {
            if self.scheduler.generations().is_current(generation) {
                cache.set(key, Arc::clone(&entry));
                self.written.insert(key, entry);
            }
        }

        discovered
    }
}
