//! Module records

use std::fmt;

use serde::{Deserialize, Serialize};

use super::exports::ExportsInfo;
use crate::error::BuildError;
use crate::hash::ContentHash;
use crate::resolver::DependencyRecord;
use crate::scheduler::ModuleProfile;

/// Index of a module in the [`ModuleGraph`](super::ModuleGraph) arena.
///
/// Ids are handed out in integration order, which is deterministic, so they
/// double as a stable discovery order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleId(pub u32);

impl ModuleId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m{}", self.0)
    }
}

/// The kinds of module the core reasons about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModuleKind {
    /// Statically analyzable ES module with a known export list
    Static { provided_exports: Vec<String> },

    /// Consumed through `require` or built from unknown content; exports
    /// cannot be enumerated
    Dynamic,

    /// Left to the host environment
    External { request: String },

    /// Produced by a generator (stylesheets, assets, runtime helpers)
    Generated { generator: String },
}

impl ModuleKind {
    /// Export names, when statically known
    pub fn provided_exports(&self) -> Option<&[String]> {
        match self {
            ModuleKind::Static { provided_exports } => Some(provided_exports),
            _ => None,
        }
    }

    pub fn is_external(&self) -> bool {
        matches!(self, ModuleKind::External { .. })
    }
}

/// A unit of compiled source in the dependency graph.
#[derive(Debug, Clone)]
pub struct Module {
    pub id: ModuleId,

    /// Resolved, stable identifier (path + query + context)
    pub identifier: String,

    pub kind: ModuleKind,

    /// Estimated size in bytes
    pub size: u64,

    /// Digest of the raw source, if it was read
    pub digest: Option<ContentHash>,

    /// Dependency requests as declared, in source order
    pub dependencies: Vec<DependencyRecord>,

    pub exports: ExportsInfo,

    pub profile: ModuleProfile,

    /// Unrecovered failures; an errored module stays in the graph
    pub errors: Vec<BuildError>,

    /// Failed optional dependencies
    pub warnings: Vec<BuildError>,

    /// Opaque id assigned after optimization
    pub module_id: Option<String>,
}

impl Module {
    /// A placeholder for a discovered module whose build is still in flight
    pub fn pending(identifier: impl Into<String>) -> Self {
        Self {
            id: ModuleId(0),
            identifier: identifier.into(),
            kind: ModuleKind::Dynamic,
            size: 0,
            digest: None,
            dependencies: Vec::new(),
            exports: ExportsInfo::default(),
            profile: ModuleProfile::default(),
            errors: Vec::new(),
            warnings: Vec::new(),
            module_id: None,
        }
    }

    /// A built module with the given kind and size
    pub fn new(identifier: impl Into<String>, kind: ModuleKind, size: u64) -> Self {
        let mut module = Self::pending(identifier);
        module.set_kind(kind);
        module.size = size;
        module
    }

    /// Replace the kind and reset export information accordingly
    pub fn set_kind(&mut self, kind: ModuleKind) {
        self.exports = ExportsInfo::new(kind.provided_exports());
        self.kind = kind;
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}
