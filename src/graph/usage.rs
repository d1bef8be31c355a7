//! Export usage propagation
//!
//! Usage flows backward along connections: a connection requesting `x` from
//! its target marks `x` used there in every runtime its origin runs in.
//! Re-exports forward the usage the origin itself received, so the pass is
//! repeated until nothing changes. Cycles are fine: usage sets only grow and
//! are bounded by the exports and runtimes present.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use super::exports::RuntimeSet;
use super::module::ModuleId;
use super::ModuleGraph;
use crate::resolver::ExportsRequest;

enum UsageUpdate {
    Named {
        target: ModuleId,
        name: String,
        runtimes: RuntimeSet,
        by: ModuleId,
    },
    Unknown {
        target: ModuleId,
        runtimes: RuntimeSet,
        by: ModuleId,
    },
}

impl ModuleGraph {
    /// Recompute runtimes and export usage for the whole graph.
    ///
    /// Returns the number of passes needed to reach the fixed point.
    pub fn propagate_usage(&mut self) -> usize {
        self.compute_runtimes();
        for id in self.module_ids() {
            if let Some(module) = self.module_mut(id) {
                module.exports.reset_usage();
            }
        }

        let star_exports = self.star_exports();

        let mut passes = 0;
        loop {
            passes += 1;
            let updates = self.collect_usage_updates(&star_exports);

            let mut changed = false;
            for update in updates {
                changed |= self.apply_usage_update(update);
            }

            if !changed {
                break;
            }
        }

        debug!("Export usage settled after {} pass(es)", passes);
        passes
    }

    /// Names each module exposes through its declarations and `export *`
    /// chains. `None` when a chain reaches a module with unknown exports.
    fn star_exports(&self) -> BTreeMap<ModuleId, Option<BTreeSet<String>>> {
        let mut result = BTreeMap::new();
        for id in self.module_ids() {
            let mut names = BTreeSet::new();
            let mut visited = BTreeSet::new();
            let mut stack = vec![id];
            let mut known = true;

            while let Some(current) = stack.pop() {
                if !visited.insert(current) {
                    continue;
                }
                let Some(provided) = self.exports_info(current).and_then(|e| e.provided_exports())
                else {
                    known = false;
                    break;
                };
                names.extend(provided.into_iter().map(str::to_string));
                stack.extend(
                    self.outgoing_connections(current)
                        .filter(|c| matches!(c.exports, ExportsRequest::ReexportAll))
                        .map(|c| c.target),
                );
            }

            result.insert(id, known.then_some(names));
        }
        result
    }

    /// Updates implied by the current usage state, in connection order
    fn collect_usage_updates(
        &self,
        star_exports: &BTreeMap<ModuleId, Option<BTreeSet<String>>>,
    ) -> Vec<UsageUpdate> {
        let mut updates = Vec::new();

        for module in self.modules() {
            let origin = module.id;
            let runtimes = self.runtimes(origin);
            if runtimes.is_empty() {
                continue;
            }

            for connection in self.outgoing_connections(origin) {
                let target = connection.target;
                match &connection.exports {
                    ExportsRequest::SideEffect => {}
                    ExportsRequest::Named(names) => {
                        for name in names {
                            updates.push(UsageUpdate::Named {
                                target,
                                name: name.clone(),
                                runtimes: runtimes.clone(),
                                by: origin,
                            });
                        }
                    }
                    ExportsRequest::Namespace | ExportsRequest::Dynamic => {
                        updates.push(UsageUpdate::Unknown {
                            target,
                            runtimes: runtimes.clone(),
                            by: origin,
                        });
                    }
                    ExportsRequest::Reexport(pairs) => {
                        for (exported, imported) in pairs {
                            let used = module.exports.runtimes_using(exported);
                            if !used.is_empty() {
                                updates.push(UsageUpdate::Named {
                                    target,
                                    name: imported.clone(),
                                    runtimes: used,
                                    by: origin,
                                });
                            }
                        }
                    }
                    ExportsRequest::ReexportAll => {
                        let target_provides = star_exports.get(&target).and_then(Option::as_ref);

                        let Some(target_provides) = target_provides else {
                            // Nothing can be said about what passes through
                            updates.push(UsageUpdate::Unknown {
                                target,
                                runtimes: runtimes.clone(),
                                by: origin,
                            });
                            continue;
                        };

                        if module.exports.has_unknown_usage() {
                            updates.push(UsageUpdate::Unknown {
                                target,
                                runtimes: module.exports.unknown_runtimes().clone(),
                                by: origin,
                            });
                        }

                        for (name, info) in module.exports.iter() {
                            if info.used_in.is_empty()
                                || info.provided == Some(true)
                                || !target_provides.contains(name)
                            {
                                continue;
                            }
                            updates.push(UsageUpdate::Named {
                                target,
                                name: name.to_string(),
                                runtimes: info.used_in.clone(),
                                by: origin,
                            });
                        }
                    }
                }
            }
        }

        updates
    }

    fn apply_usage_update(&mut self, update: UsageUpdate) -> bool {
        match update {
            UsageUpdate::Named {
                target,
                name,
                runtimes,
                by,
            } => self
                .module_mut(target)
                .is_some_and(|m| m.exports.set_used(&name, &runtimes, Some(by))),
            UsageUpdate::Unknown {
                target,
                runtimes,
                by,
            } => self
                .module_mut(target)
                .is_some_and(|m| m.exports.set_used_unknown(&runtimes, Some(by))),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::graph::{Module, ModuleGraph, ModuleId, ModuleKind};
    use crate::resolver::{DependencyRecord, ExportsRequest};

    fn add(graph: &mut ModuleGraph, identifier: &str, exports: Option<&[&str]>) -> ModuleId {
        let kind = match exports {
            Some(names) => ModuleKind::Static {
                provided_exports: names.iter().map(|n| n.to_string()).collect(),
            },
            None => ModuleKind::Dynamic,
        };
        graph.add_module(Module::new(identifier, kind, 10))
    }

    fn used(graph: &ModuleGraph, id: ModuleId, name: &str) -> bool {
        graph.exports_info(id).unwrap().used(name)
    }

    #[test]
    fn test_cyclic_usage_reaches_fixed_point() {
        let mut graph = ModuleGraph::new();
        let a = add(&mut graph, "./a.js", Some(&["y", "z"]));
        let b = add(&mut graph, "./b.js", Some(&["x", "w"]));
        graph.add_connection(a, b, &DependencyRecord::named("./b.js", &["x"]));
        graph.add_connection(b, a, &DependencyRecord::named("./a.js", &["y"]));
        graph.add_entry("main", a);

        let passes = graph.propagate_usage();
        assert!(passes >= 1);

        assert!(used(&graph, b, "x"));
        assert!(used(&graph, a, "y"));
        assert!(!used(&graph, a, "z"));
        assert!(!used(&graph, b, "w"));
        assert!(graph.exports_info(b).unwrap().can_mangle("x"));
    }

    #[test]
    fn test_named_reexport_forwards_usage() {
        let mut graph = ModuleGraph::new();
        let entry = add(&mut graph, "./index.js", Some(&[]));
        let barrel = add(&mut graph, "./barrel.js", Some(&["a", "unused"]));
        let inner = add(&mut graph, "./inner.js", Some(&["b", "c"]));
        let other = add(&mut graph, "./other.js", Some(&["d"]));

        graph.add_connection(entry, barrel, &DependencyRecord::named("./barrel.js", &["a"]));
        graph.add_connection(
            barrel,
            inner,
            &DependencyRecord::new(
                "./inner.js",
                ExportsRequest::Reexport(vec![("a".to_string(), "b".to_string())]),
            ),
        );
        graph.add_connection(
            barrel,
            other,
            &DependencyRecord::new(
                "./other.js",
                ExportsRequest::Reexport(vec![("unused".to_string(), "d".to_string())]),
            ),
        );
        graph.add_entry("main", entry);
        graph.propagate_usage();

        assert!(used(&graph, inner, "b"));
        assert!(!used(&graph, inner, "c"));
        assert!(!used(&graph, other, "d"));
    }

    #[test]
    fn test_star_reexport_from_known_origin() {
        let mut graph = ModuleGraph::new();
        let entry = add(&mut graph, "./index.js", Some(&[]));
        let barrel = add(&mut graph, "./barrel.js", Some(&["own"]));
        let inner = add(&mut graph, "./inner.js", Some(&["q", "r", "own"]));

        graph.add_connection(entry, barrel, &DependencyRecord::named("./barrel.js", &["q", "own"]));
        graph.add_connection(
            barrel,
            inner,
            &DependencyRecord::new("./inner.js", ExportsRequest::ReexportAll),
        );
        graph.add_entry("main", entry);
        graph.propagate_usage();

        assert!(used(&graph, inner, "q"));
        assert!(!used(&graph, inner, "r"));
        // The barrel's own declaration shadows the star export
        assert!(!used(&graph, inner, "own"));
        assert!(!graph.exports_info(inner).unwrap().has_unknown_usage());
    }

    #[test]
    fn test_nested_star_reexports_reach_the_declaring_module() {
        let mut graph = ModuleGraph::new();
        let entry = add(&mut graph, "./index.js", Some(&[]));
        let barrel = add(&mut graph, "./barrel.js", Some(&[]));
        let mid = add(&mut graph, "./mid.js", Some(&[]));
        let deep = add(&mut graph, "./deep.js", Some(&["q", "r"]));

        graph.add_connection(entry, barrel, &DependencyRecord::named("./barrel.js", &["q"]));
        graph.add_connection(
            barrel,
            mid,
            &DependencyRecord::new("./mid.js", ExportsRequest::ReexportAll),
        );
        graph.add_connection(
            mid,
            deep,
            &DependencyRecord::new("./deep.js", ExportsRequest::ReexportAll),
        );
        graph.add_entry("main", entry);
        graph.propagate_usage();

        let info = graph.exports_info(deep).unwrap();
        assert!(info.used("q"));
        assert!(!info.used("r"));
        assert!(!info.has_unknown_usage());
    }

    #[test]
    fn test_star_chain_into_unknown_exports_is_conservative() {
        let mut graph = ModuleGraph::new();
        let entry = add(&mut graph, "./index.js", Some(&[]));
        let barrel = add(&mut graph, "./barrel.js", Some(&[]));
        let mid = add(&mut graph, "./mid.js", Some(&[]));
        let cjs = add(&mut graph, "./legacy.js", None);

        graph.add_connection(entry, barrel, &DependencyRecord::named("./barrel.js", &["q"]));
        graph.add_connection(
            barrel,
            mid,
            &DependencyRecord::new("./mid.js", ExportsRequest::ReexportAll),
        );
        graph.add_connection(
            mid,
            cjs,
            &DependencyRecord::new("./legacy.js", ExportsRequest::ReexportAll),
        );
        graph.add_entry("main", entry);
        graph.propagate_usage();

        assert!(graph.exports_info(mid).unwrap().has_unknown_usage());
        assert!(graph.exports_info(cjs).unwrap().has_unknown_usage());
    }

    #[test]
    fn test_star_reexport_from_unknown_origin_is_conservative() {
        let mut graph = ModuleGraph::new();
        let entry = add(&mut graph, "./index.js", Some(&[]));
        let barrel = add(&mut graph, "./barrel.js", Some(&[]));
        let cjs = add(&mut graph, "./legacy.js", None);

        graph.add_connection(entry, barrel, &DependencyRecord::named("./barrel.js", &["q"]));
        graph.add_connection(
            barrel,
            cjs,
            &DependencyRecord::new("./legacy.js", ExportsRequest::ReexportAll),
        );
        graph.add_entry("main", entry);
        graph.propagate_usage();

        let info = graph.exports_info(cjs).unwrap();
        assert!(info.has_unknown_usage());
        assert!(info.used("anything"));
        assert!(!info.can_mangle("q"));
    }

    #[test]
    fn test_dynamic_and_namespace_access_mark_everything_used() {
        let mut graph = ModuleGraph::new();
        let entry = add(&mut graph, "./index.js", Some(&[]));
        let lazy = add(&mut graph, "./lazy.js", Some(&["a", "b"]));
        let ns = add(&mut graph, "./ns.js", Some(&["c"]));
        let dynamic = add(&mut graph, "./dyn.js", Some(&["d"]));

        graph.add_connection(entry, lazy, &DependencyRecord::dynamic_import("./lazy.js"));
        graph.add_connection(
            entry,
            ns,
            &DependencyRecord::new("./ns.js", ExportsRequest::Namespace),
        );
        graph.add_connection(
            entry,
            dynamic,
            &DependencyRecord::new("./dyn.js", ExportsRequest::Dynamic),
        );
        graph.add_entry("main", entry);
        graph.propagate_usage();

        for (id, name) in [(lazy, "a"), (lazy, "b"), (ns, "c"), (dynamic, "d")] {
            assert!(used(&graph, id, name));
            assert!(!graph.exports_info(id).unwrap().can_mangle(name));
        }
    }

    #[test]
    fn test_unreachable_connections_do_not_count() {
        let mut graph = ModuleGraph::new();
        let entry = add(&mut graph, "./index.js", Some(&[]));
        let dead = add(&mut graph, "./dead.js", Some(&[]));
        let lib = add(&mut graph, "./lib.js", Some(&["x", "y"]));

        graph.add_connection(entry, lib, &DependencyRecord::named("./lib.js", &["x"]));
        graph.add_connection(dead, lib, &DependencyRecord::named("./lib.js", &["y"]));
        graph.add_entry("main", entry);
        graph.propagate_usage();

        assert!(used(&graph, lib, "x"));
        assert!(!used(&graph, lib, "y"));
    }

    #[test]
    fn test_usage_is_tracked_per_runtime() {
        let mut graph = ModuleGraph::new();
        let main = add(&mut graph, "./main.js", Some(&[]));
        let admin = add(&mut graph, "./admin.js", Some(&[]));
        let lib = add(&mut graph, "./lib.js", Some(&["x", "y"]));

        graph.add_connection(main, lib, &DependencyRecord::named("./lib.js", &["x"]));
        graph.add_connection(admin, lib, &DependencyRecord::named("./lib.js", &["x", "y"]));
        graph.add_entry("main", main);
        graph.add_entry("admin", admin);
        graph.propagate_usage();

        let info = graph.exports_info(lib).unwrap();
        assert!(info.used_in("x", "main"));
        assert!(info.used_in("y", "admin"));
        assert!(!info.used_in("y", "main"));
    }

    #[test]
    fn test_propagation_is_repeatable() {
        let mut graph = ModuleGraph::new();
        let a = add(&mut graph, "./a.js", Some(&["y"]));
        let b = add(&mut graph, "./b.js", Some(&["x"]));
        graph.add_connection(a, b, &DependencyRecord::named("./b.js", &["x"]));
        graph.add_entry("main", a);

        graph.propagate_usage();
        let first = graph.exports_info(b).unwrap().clone();
        graph.propagate_usage();
        assert_eq!(graph.exports_info(b).unwrap(), &first);
    }
}
