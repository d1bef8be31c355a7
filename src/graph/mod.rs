//! Module dependency graph
//!
//! An arena of modules and the export-aware connections between them. Nodes
//! are addressed by [`ModuleId`]; cross-references are ids, never pointers.

mod exports;
mod module;
mod usage;

use std::collections::{HashMap, HashSet, VecDeque};

use tracing::debug;

pub use exports::{ExportInfo, ExportsInfo, RuntimeSet};
pub use module::{Module, ModuleId, ModuleKind};

use crate::chunk::ChunkGraph;
use crate::resolver::{DependencyRecord, ExportsRequest};

/// Index of a connection in the graph arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u32);

/// Directed, export-aware edge between two modules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub id: ConnectionId,
    pub origin: ModuleId,
    pub target: ModuleId,

    /// Request string as written in the origin
    pub request: String,

    pub exports: ExportsRequest,

    pub is_async: bool,

    pub is_optional: bool,
}

/// The module dependency graph
#[derive(Debug, Default)]
pub struct ModuleGraph {
    /// Slots are emptied when a module is pruned; ids are never reused
    modules: Vec<Option<Module>>,

    by_identifier: HashMap<String, ModuleId>,

    connections: Vec<Option<Connection>>,

    outgoing: Vec<Vec<ConnectionId>>,

    incoming: Vec<Vec<ConnectionId>>,

    /// Entrypoint name -> module, in declaration order
    entries: Vec<(String, ModuleId)>,

    /// Entrypoints each module is reachable from
    runtimes: Vec<RuntimeSet>,
}

impl ModuleGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a module, or return the id of the module with the same identifier
    pub fn add_module(&mut self, mut module: Module) -> ModuleId {
        if let Some(&id) = self.by_identifier.get(&module.identifier) {
            return id;
        }

        let id = ModuleId(self.modules.len() as u32);
        module.id = id;
        self.by_identifier.insert(module.identifier.clone(), id);
        self.modules.push(Some(module));
        self.outgoing.push(Vec::new());
        self.incoming.push(Vec::new());
        self.runtimes.push(RuntimeSet::new());
        id
    }

    /// Add a connection for a dependency record of `from`
    pub fn add_connection(
        &mut self,
        from: ModuleId,
        to: ModuleId,
        record: &DependencyRecord,
    ) -> ConnectionId {
        let id = ConnectionId(self.connections.len() as u32);
        self.connections.push(Some(Connection {
            id,
            origin: from,
            target: to,
            request: record.request.clone(),
            exports: record.exports.clone(),
            is_async: record.is_async,
            is_optional: record.is_optional,
        }));
        self.outgoing[from.index()].push(id);
        self.incoming[to.index()].push(id);
        id
    }

    /// Register `module` as the entry module of entrypoint `name`
    pub fn add_entry(&mut self, name: &str, module: ModuleId) {
        self.entries.push((name.to_string(), module));
    }

    pub fn entries(&self) -> &[(String, ModuleId)] {
        &self.entries
    }

    pub fn is_entry_module(&self, id: ModuleId) -> bool {
        self.entries.iter().any(|(_, m)| *m == id)
    }

    pub fn module(&self, id: ModuleId) -> Option<&Module> {
        self.modules.get(id.index()).and_then(Option::as_ref)
    }

    pub fn module_mut(&mut self, id: ModuleId) -> Option<&mut Module> {
        self.modules.get_mut(id.index()).and_then(Option::as_mut)
    }

    pub fn module_id(&self, identifier: &str) -> Option<ModuleId> {
        self.by_identifier.get(identifier).copied()
    }

    pub fn module_by_identifier(&self, identifier: &str) -> Option<&Module> {
        self.module_id(identifier).and_then(|id| self.module(id))
    }

    /// Live modules in id order
    pub fn modules(&self) -> impl Iterator<Item = &Module> {
        self.modules.iter().filter_map(Option::as_ref)
    }

    pub fn modules_mut(&mut self) -> impl Iterator<Item = &mut Module> {
        self.modules.iter_mut().filter_map(Option::as_mut)
    }

    pub fn module_ids(&self) -> Vec<ModuleId> {
        self.modules().map(|m| m.id).collect()
    }

    pub fn connection(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(id.0 as usize).and_then(Option::as_ref)
    }

    /// Outgoing connections in declaration order
    pub fn outgoing_connections(&self, id: ModuleId) -> impl Iterator<Item = &Connection> {
        self.outgoing
            .get(id.index())
            .into_iter()
            .flatten()
            .filter_map(move |c| self.connection(*c))
    }

    pub fn incoming_connections(&self, id: ModuleId) -> impl Iterator<Item = &Connection> {
        self.incoming
            .get(id.index())
            .into_iter()
            .flatten()
            .filter_map(move |c| self.connection(*c))
    }

    pub fn exports_info(&self, id: ModuleId) -> Option<&ExportsInfo> {
        self.module(id).map(|m| &m.exports)
    }

    /// Entrypoints the module is reachable from, as of the last
    /// [`compute_runtimes`](Self::compute_runtimes)
    pub fn runtimes(&self, id: ModuleId) -> &RuntimeSet {
        static EMPTY: RuntimeSet = RuntimeSet::new();
        self.runtimes.get(id.index()).unwrap_or(&EMPTY)
    }

    /// Recompute, for every module, the entrypoints reaching it through any
    /// connection (sync or async).
    pub fn compute_runtimes(&mut self) {
        for runtimes in &mut self.runtimes {
            runtimes.clear();
        }

        for (name, entry) in self.entries.clone() {
            let mut queue = VecDeque::from([entry]);
            let mut seen = HashSet::from([entry]);
            while let Some(id) = queue.pop_front() {
                self.runtimes[id.index()].insert(name.clone());
                let targets: Vec<ModuleId> =
                    self.outgoing_connections(id).map(|c| c.target).collect();
                for target in targets {
                    if seen.insert(target) {
                        queue.push_back(target);
                    }
                }
            }
        }
    }

    /// Modules reachable from `start`, breadth first
    pub fn reachable_modules(&self, start: ModuleId) -> Vec<ModuleId> {
        let mut visited = HashSet::from([start]);
        let mut result = Vec::new();
        let mut queue = VecDeque::from([start]);

        while let Some(id) = queue.pop_front() {
            result.push(id);
            for connection in self.outgoing_connections(id) {
                if visited.insert(connection.target) {
                    queue.push_back(connection.target);
                }
            }
        }
        result
    }

    /// Remove a module and every connection touching it
    pub fn remove_module(&mut self, id: ModuleId) -> Option<Module> {
        let module = self.modules.get_mut(id.index())?.take()?;
        self.by_identifier.remove(&module.identifier);

        let touching: Vec<ConnectionId> = self.outgoing[id.index()]
            .drain(..)
            .chain(self.incoming[id.index()].drain(..))
            .collect();
        for connection_id in touching {
            if let Some(connection) = self.connections[connection_id.0 as usize].take() {
                self.outgoing[connection.origin.index()].retain(|c| *c != connection_id);
                self.incoming[connection.target.index()].retain(|c| *c != connection_id);
            }
        }
        self.runtimes[id.index()].clear();
        Some(module)
    }

    /// Prune modules that no chunk references. Returns their identifiers.
    pub fn remove_orphans(&mut self, chunks: &ChunkGraph) -> Vec<String> {
        let orphans: Vec<ModuleId> = self
            .modules()
            .filter(|m| chunks.chunks_of_module(m.id).is_empty())
            .map(|m| m.id)
            .collect();

        let removed: Vec<String> = orphans
            .into_iter()
            .filter_map(|id| self.remove_module(id))
            .map(|m| m.identifier)
            .collect();
        if !removed.is_empty() {
            debug!("Pruned {} orphaned module(s)", removed.len());
        }
        removed
    }

    /// Modules carrying unrecovered errors
    pub fn errored_modules(&self) -> impl Iterator<Item = &Module> {
        self.modules().filter(|m| m.has_errors())
    }

    /// Total number of live modules
    pub fn len(&self) -> usize {
        self.modules().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn static_module(identifier: &str, exports: &[&str]) -> Module {
        Module::new(
            identifier,
            ModuleKind::Static {
                provided_exports: exports.iter().map(|e| e.to_string()).collect(),
            },
            10,
        )
    }

    #[test]
    fn test_module_graph_basic() {
        let mut graph = ModuleGraph::new();
        let a = graph.add_module(static_module("./a.js", &[]));
        let b = graph.add_module(static_module("./b.js", &["x"]));

        assert_eq!(graph.add_module(static_module("./a.js", &[])), a);
        assert_eq!(graph.len(), 2);
        assert_eq!(graph.module_id("./b.js"), Some(b));

        graph.add_connection(a, b, &DependencyRecord::named("./b.js", &["x"]));
        let outgoing: Vec<ModuleId> = graph.outgoing_connections(a).map(|c| c.target).collect();
        let incoming: Vec<ModuleId> = graph.incoming_connections(b).map(|c| c.origin).collect();
        assert_eq!(outgoing, vec![b]);
        assert_eq!(incoming, vec![a]);
    }

    #[test]
    fn test_cycles_are_stored() {
        let mut graph = ModuleGraph::new();
        let a = graph.add_module(static_module("./a.js", &[]));
        let b = graph.add_module(static_module("./b.js", &[]));
        graph.add_connection(a, b, &DependencyRecord::named("./b.js", &[]));
        graph.add_connection(b, a, &DependencyRecord::named("./a.js", &[]));

        assert_eq!(graph.reachable_modules(a), vec![a, b]);
        assert_eq!(graph.reachable_modules(b), vec![b, a]);
    }

    #[test]
    fn test_runtimes_follow_async_edges() {
        let mut graph = ModuleGraph::new();
        let main = graph.add_module(static_module("./main.js", &[]));
        let admin = graph.add_module(static_module("./admin.js", &[]));
        let lazy = graph.add_module(static_module("./lazy.js", &[]));
        graph.add_connection(main, lazy, &DependencyRecord::dynamic_import("./lazy.js"));
        graph.add_entry("main", main);
        graph.add_entry("admin", admin);
        graph.compute_runtimes();

        assert_eq!(graph.runtimes(lazy).len(), 1);
        assert!(graph.runtimes(lazy).contains("main"));
        assert!(graph.runtimes(admin).contains("admin"));
    }

    #[test]
    fn test_remove_module_detaches_connections() {
        let mut graph = ModuleGraph::new();
        let a = graph.add_module(static_module("./a.js", &[]));
        let b = graph.add_module(static_module("./b.js", &[]));
        graph.add_connection(a, b, &DependencyRecord::named("./b.js", &[]));

        let removed = graph.remove_module(b).unwrap();
        assert_eq!(removed.identifier, "./b.js");
        assert!(graph.module(b).is_none());
        assert_eq!(graph.outgoing_connections(a).count(), 0);
        assert_eq!(graph.module_id("./b.js"), None);

        // Ids are not reused
        let c = graph.add_module(static_module("./c.js", &[]));
        assert_eq!(c, ModuleId(2));
    }
}
