//! Per-module export provision and usage

use std::collections::{BTreeMap, BTreeSet};

use super::module::ModuleId;

/// Set of runtimes (entrypoint names)
pub type RuntimeSet = BTreeSet<String>;

/// Usage record of one named export.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportInfo {
    /// `Some(true)` when the module declares it, `Some(false)` when it is
    /// requested but not declared, `None` when the module's exports are unknown
    pub provided: Option<bool>,

    /// Runtimes in which the export is used
    pub used_in: RuntimeSet,

    /// Modules requesting the export
    pub used_by: BTreeSet<ModuleId>,
}

/// Export information for one module.
///
/// Besides named usage this tracks "unknown" usage: the module was consumed
/// through a pattern that cannot be analyzed (dynamic access, a namespace
/// escaping to unknown code, `export *` from an unknown origin). Unknown
/// usage in a runtime means every export is used there and none may be
/// renamed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportsInfo {
    exports: BTreeMap<String, ExportInfo>,

    provided_known: bool,

    unknown_used_in: RuntimeSet,

    unknown_used_by: BTreeSet<ModuleId>,
}

impl ExportsInfo {
    pub fn new(provided: Option<&[String]>) -> Self {
        let mut info = Self::default();
        if let Some(names) = provided {
            info.provided_known = true;
            for name in names {
                info.exports.insert(
                    name.clone(),
                    ExportInfo {
                        provided: Some(true),
                        ..Default::default()
                    },
                );
            }
        }
        info
    }

    /// Forget all usage, keeping provision
    pub fn reset_usage(&mut self) {
        self.exports.retain(|_, info| info.provided == Some(true));
        for info in self.exports.values_mut() {
            info.used_in.clear();
            info.used_by.clear();
        }
        self.unknown_used_in.clear();
        self.unknown_used_by.clear();
    }

    /// Mark `name` used in `runtimes` by `by`. Returns whether anything changed.
    pub fn set_used(&mut self, name: &str, runtimes: &RuntimeSet, by: Option<ModuleId>) -> bool {
        let provided_known = self.provided_known;
        let info = self
            .exports
            .entry(name.to_string())
            .or_insert_with(|| ExportInfo {
                provided: if provided_known { Some(false) } else { None },
                ..Default::default()
            });

        let mut changed = false;
        for runtime in runtimes {
            changed |= info.used_in.insert(runtime.clone());
        }
        if let Some(by) = by {
            changed |= info.used_by.insert(by);
        }
        changed
    }

    /// Mark the whole module as used through an unanalyzable pattern.
    pub fn set_used_unknown(&mut self, runtimes: &RuntimeSet, by: Option<ModuleId>) -> bool {
        let mut changed = false;
        for runtime in runtimes {
            changed |= self.unknown_used_in.insert(runtime.clone());
        }
        if let Some(by) = by {
            changed |= self.unknown_used_by.insert(by);
        }
        changed
    }

    /// Whether `name` is used in any runtime
    pub fn used(&self, name: &str) -> bool {
        !self.unknown_used_in.is_empty()
            || self
                .exports
                .get(name)
                .is_some_and(|info| !info.used_in.is_empty())
    }

    /// Whether `name` is used in `runtime`
    pub fn used_in(&self, name: &str, runtime: &str) -> bool {
        self.unknown_used_in.contains(runtime)
            || self
                .exports
                .get(name)
                .is_some_and(|info| info.used_in.contains(runtime))
    }

    /// Runtimes in which `name` is used, including unknown usage
    pub fn runtimes_using(&self, name: &str) -> RuntimeSet {
        let mut runtimes = self.unknown_used_in.clone();
        if let Some(info) = self.exports.get(name) {
            runtimes.extend(info.used_in.iter().cloned());
        }
        runtimes
    }

    /// Whether `name` may be renamed by a minifier
    pub fn can_mangle(&self, name: &str) -> bool {
        self.unknown_used_in.is_empty() && self.exports.contains_key(name)
    }

    pub fn is_provided(&self, name: &str) -> Option<bool> {
        if !self.provided_known {
            return None;
        }
        Some(
            self.exports
                .get(name)
                .is_some_and(|info| info.provided == Some(true)),
        )
    }

    /// Declared export names, when known
    pub fn provided_exports(&self) -> Option<Vec<&str>> {
        self.provided_known.then(|| {
            self.exports
                .iter()
                .filter(|(_, info)| info.provided == Some(true))
                .map(|(name, _)| name.as_str())
                .collect()
        })
    }

    /// Named exports with usage in any runtime
    pub fn used_exports(&self) -> Vec<&str> {
        self.exports
            .iter()
            .filter(|(_, info)| !info.used_in.is_empty())
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn has_unknown_usage(&self) -> bool {
        !self.unknown_used_in.is_empty()
    }

    /// Runtimes with unknown usage
    pub fn unknown_runtimes(&self) -> &RuntimeSet {
        &self.unknown_used_in
    }

    pub fn export(&self, name: &str) -> Option<&ExportInfo> {
        self.exports.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ExportInfo)> {
        self.exports.iter().map(|(name, info)| (name.as_str(), info))
    }

    /// Whether the module is used identically under two runtime sets.
    ///
    /// Usage under a set means usage in any runtime of the set.
    pub fn is_equally_used(&self, a: &RuntimeSet, b: &RuntimeSet) -> bool {
        let touches = |used: &RuntimeSet, set: &RuntimeSet| !used.is_disjoint(set);

        if touches(&self.unknown_used_in, a) != touches(&self.unknown_used_in, b) {
            return false;
        }
        self.exports
            .values()
            .all(|info| touches(&info.used_in, a) == touches(&info.used_in, b))
    }
}
