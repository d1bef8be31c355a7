//! Initial chunk graph construction
//!
//! Every entrypoint gets a group with one chunk holding everything reachable
//! through synchronous connections. Each async connection starts (or reuses)
//! the group for its target module, processed breadth-first after the
//! current one. Traversal follows declaration order throughout, so the
//! result only depends on the module graph.

use std::collections::{HashMap, HashSet, VecDeque};

use anyhow::{Context, Result};
use tracing::{debug, trace};

use super::{ChunkGraph, ChunkGroupId, ChunkGroupKind, ChunkKind, ChunkUkey};
use crate::graph::{ModuleGraph, ModuleId};

/// An async connection found while visiting a group
struct AsyncBlock {
    origin: ModuleId,
    request: String,
    target: ModuleId,
}

/// Derive the initial chunk graph from a settled module graph
pub fn build_chunk_graph(modules: &ModuleGraph) -> Result<ChunkGraph> {
    let mut graph = ChunkGraph::new();
    let mut queue: VecDeque<ChunkGroupId> = VecDeque::new();
    let mut async_groups: HashMap<ModuleId, ChunkGroupId> = HashMap::new();

    for (name, entry) in modules.entries() {
        let chunk = graph.add_chunk(Some(name.clone()), ChunkKind::Entry);
        let group = graph.add_group(ChunkGroupKind::Entrypoint {
            name: name.clone(),
            runtime_chunk: chunk,
            entry_module: *entry,
        });
        if let Some(g) = graph.group_mut(group) {
            g.runtime.insert(name.clone());
        }
        graph.connect_chunk_and_group(chunk, group, None);
        queue.push_back(group);
    }

    while let Some(group) = queue.pop_front() {
        for block in visit_group(modules, &mut graph, group) {
            let child = match async_groups.get(&block.target) {
                Some(&child) => child,
                None => {
                    let chunk = graph.add_chunk(None, ChunkKind::Async);
                    let child = graph.add_group(ChunkGroupKind::Async {
                        origin: block.origin,
                        request: block.request.clone(),
                        root_module: block.target,
                    });
                    graph.connect_chunk_and_group(chunk, child, None);
                    async_groups.insert(block.target, child);
                    queue.push_back(child);
                    child
                }
            };

            // Already loaded on every path leading here
            if child == group || graph.is_ancestor(child, group) {
                trace!("Skipping async link {} -> {} ({})", group, child, block.request);
                continue;
            }
            graph.link_groups(group, child)?;
        }
    }

    graph.propagate_runtimes()?;
    graph
        .validate()
        .context("Chunk graph construction broke an invariant")?;

    debug!(
        "Built {} chunk(s) in {} group(s)",
        graph.chunk_count(),
        graph.groups().count()
    );
    Ok(graph)
}

/// Depth-first walk over the synchronous closure of the group's root.
///
/// Records both module orders on the group, fills its chunk and returns the
/// async connections met on the way.
fn visit_group(modules: &ModuleGraph, graph: &mut ChunkGraph, group: ChunkGroupId) -> Vec<AsyncBlock> {
    let Some((root, chunk)) = graph
        .group(group)
        .and_then(|g| g.chunks.first().map(|c| (g.root_module(), *c)))
    else {
        return Vec::new();
    };

    let mut blocks = Vec::new();
    let mut visited = HashSet::from([root]);
    // (module, outgoing (target, is_async, request), next index)
    let mut stack: Vec<(ModuleId, Vec<(ModuleId, bool, String)>, usize)> = Vec::new();

    enter_module(modules, graph, group, chunk, root, &mut stack);

    while let Some((module, connections, next)) = stack.last_mut() {
        let module = *module;
        let Some((target, is_async, request)) = connections.get(*next).cloned() else {
            if let Some(g) = graph.group_mut(group) {
                g.push_post_order(module);
            }
            stack.pop();
            continue;
        };
        *next += 1;

        if is_async {
            // A failed lazy target also breaks the group that requests it
            if let Some(failed) = modules.module(target).filter(|m| m.has_errors()) {
                if let Some(g) = graph.group_mut(group) {
                    for error in &failed.errors {
                        g.add_error(target, error.clone());
                    }
                }
            }
            blocks.push(AsyncBlock {
                origin: module,
                request,
                target,
            });
        } else if visited.insert(target) {
            enter_module(modules, graph, group, chunk, target, &mut stack);
        }
    }

    blocks
}

fn enter_module(
    modules: &ModuleGraph,
    graph: &mut ChunkGraph,
    group: ChunkGroupId,
    chunk: ChunkUkey,
    id: ModuleId,
    stack: &mut Vec<(ModuleId, Vec<(ModuleId, bool, String)>, usize)>,
) {
    graph.connect_chunk_and_module(chunk, id);

    if let Some(g) = graph.group_mut(group) {
        g.push_pre_order(id);
        if let Some(module) = modules.module(id) {
            for error in &module.errors {
                g.add_error(id, error.clone());
            }
        }
    }

    let connections = modules
        .outgoing_connections(id)
        .map(|c| (c.target, c.is_async, c.request.clone()))
        .collect();
    stack.push((id, connections, 0));
}

impl ChunkGraph {
    /// Push entrypoint runtimes down the group DAG and onto the chunks.
    pub fn propagate_runtimes(&mut self) -> Result<()> {
        for id in self.topological_groups()? {
            let (runtime, children) = {
                let group = &self.groups[id.index()];
                (group.runtime.clone(), group.children.clone())
            };
            for child in children {
                self.groups[child.index()].runtime.extend(runtime.iter().cloned());
            }
        }

        for ukey in self.chunk_keys() {
            let runtime = match self.chunk(ukey) {
                Some(chunk) => self.runtime_of(&chunk.groups),
                None => continue,
            };
            if let Some(chunk) = self.chunk_mut(ukey) {
                chunk.runtime = runtime;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BuildError;
    use crate::graph::{Module, ModuleKind};
    use crate::resolver::DependencyRecord;
    use pretty_assertions::assert_eq;

    fn add(graph: &mut ModuleGraph, identifier: &str) -> ModuleId {
        graph.add_module(Module::new(
            identifier,
            ModuleKind::Static {
                provided_exports: Vec::new(),
            },
            10,
        ))
    }

    fn sync(graph: &mut ModuleGraph, from: ModuleId, to: ModuleId) {
        graph.add_connection(from, to, &DependencyRecord::named("./x", &[]));
    }

    fn lazy(graph: &mut ModuleGraph, from: ModuleId, to: ModuleId) {
        graph.add_connection(from, to, &DependencyRecord::dynamic_import("./lazy"));
    }

    #[test]
    fn test_pre_and_post_order() {
        let mut modules = ModuleGraph::new();
        let entry = add(&mut modules, "./index.js");
        let a = add(&mut modules, "./a.js");
        let b = add(&mut modules, "./b.js");
        let c = add(&mut modules, "./c.js");
        sync(&mut modules, entry, a);
        sync(&mut modules, entry, b);
        sync(&mut modules, a, c);
        sync(&mut modules, b, c);
        modules.add_entry("main", entry);

        let graph = build_chunk_graph(&modules).unwrap();
        let group = graph.entrypoint("main").unwrap();

        assert_eq!(group.pre_order(), &[entry, a, c, b]);
        assert_eq!(group.post_order(), &[c, a, b, entry]);
        assert_eq!(graph.named_chunk("main").unwrap().len(), 4);
    }

    #[test]
    fn test_async_connections_start_child_groups() {
        let mut modules = ModuleGraph::new();
        let entry = add(&mut modules, "./index.js");
        let page = add(&mut modules, "./page.js");
        let helper = add(&mut modules, "./helper.js");
        lazy(&mut modules, entry, page);
        sync(&mut modules, page, helper);
        modules.add_entry("main", entry);

        let graph = build_chunk_graph(&modules).unwrap();
        let main = graph.entrypoint("main").unwrap();
        assert_eq!(main.children.len(), 1);

        let child = graph.group(*main.children.iter().next().unwrap()).unwrap();
        assert!(!child.is_initial());
        assert_eq!(child.pre_order(), &[page, helper]);
        assert!(child.runtime.contains("main"));

        // The entry chunk stops at the async boundary
        assert!(!graph.named_chunk("main").unwrap().contains(page));
    }

    #[test]
    fn test_async_cycles_do_not_create_group_cycles() {
        let mut modules = ModuleGraph::new();
        let entry = add(&mut modules, "./index.js");
        let a = add(&mut modules, "./a.js");
        let b = add(&mut modules, "./b.js");
        lazy(&mut modules, entry, a);
        lazy(&mut modules, a, b);
        lazy(&mut modules, b, a);
        modules.add_entry("main", entry);

        let graph = build_chunk_graph(&modules).unwrap();
        assert_eq!(graph.groups().count(), 3);
        graph.validate().unwrap();
    }

    #[test]
    fn test_shared_async_target_reuses_group() {
        let mut modules = ModuleGraph::new();
        let main = add(&mut modules, "./main.js");
        let admin = add(&mut modules, "./admin.js");
        let page = add(&mut modules, "./page.js");
        lazy(&mut modules, main, page);
        lazy(&mut modules, admin, page);
        modules.add_entry("admin", admin);
        modules.add_entry("main", main);

        let graph = build_chunk_graph(&modules).unwrap();
        let async_groups: Vec<_> = graph.groups().filter(|g| !g.is_initial()).collect();
        assert_eq!(async_groups.len(), 1);
        assert_eq!(async_groups[0].parents.len(), 2);
        assert_eq!(async_groups[0].runtime.len(), 2);
    }

    #[test]
    fn test_errors_mark_only_referencing_groups() {
        let mut modules = ModuleGraph::new();
        let main = add(&mut modules, "./main.js");
        let admin = add(&mut modules, "./admin.js");
        let broken = add(&mut modules, "./broken.js");
        sync(&mut modules, main, broken);
        modules
            .module_mut(broken)
            .unwrap()
            .errors
            .push(BuildError::build("./broken.js", "unexpected token"));
        modules.add_entry("main", main);
        modules.add_entry("admin", admin);

        let graph = build_chunk_graph(&modules).unwrap();
        let main_group = graph.entrypoint("main").unwrap();
        assert!(!main_group.is_renderable());
        assert_eq!(main_group.errors[0].0, broken);
        assert!(graph.entrypoint("admin").unwrap().is_renderable());
    }
}
