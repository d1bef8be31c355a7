//! Module sources
//!
//! The seam between the core and the outside world: locating modules,
//! reading their bytes and turning those into dependency records. The core
//! only sees the [`ModuleSource`] trait.

mod fs;
mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::BuildError;
use crate::graph::ModuleKind;
use crate::hash::ContentHash;

pub use fs::FsResolver;
pub use memory::{MemoryModule, MemorySource};

/// Which exports a dependency consumes from its target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExportsRequest {
    /// `import "./x"`: evaluated for side effects only
    SideEffect,

    /// `import { a, b } from "./x"`
    Named(Vec<String>),

    /// `export { a as b } from "./x"`: pairs of (exported name, imported name)
    Reexport(Vec<(String, String)>),

    /// `export * from "./x"`
    ReexportAll,

    /// `import * as ns from "./x"` where the namespace escapes analysis
    Namespace,

    /// `require("./x")` or computed property access
    Dynamic,
}

impl ExportsRequest {
    /// Whether the pattern defeats export analysis
    pub fn is_unanalyzable(&self) -> bool {
        matches!(self, ExportsRequest::Namespace | ExportsRequest::Dynamic)
    }
}

/// One declared dependency of a module, as delivered by the parser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyRecord {
    /// Unresolved request string
    pub request: String,

    pub exports: ExportsRequest,

    /// Crosses an async boundary (creates a chunk split point)
    pub is_async: bool,

    /// Failure to resolve is a warning, not an error
    pub is_optional: bool,
}

impl DependencyRecord {
    pub fn new(request: impl Into<String>, exports: ExportsRequest) -> Self {
        Self {
            request: request.into(),
            exports,
            is_async: false,
            is_optional: false,
        }
    }

    pub fn named(request: impl Into<String>, names: &[&str]) -> Self {
        Self::new(
            request,
            ExportsRequest::Named(names.iter().map(|n| n.to_string()).collect()),
        )
    }

    /// `import("./x")`
    pub fn dynamic_import(request: impl Into<String>) -> Self {
        Self {
            is_async: true,
            ..Self::new(request, ExportsRequest::Namespace)
        }
    }

    pub fn optional(mut self) -> Self {
        self.is_optional = true;
        self
    }
}

/// Raw module content.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub bytes: Arc<[u8]>,
    pub digest: ContentHash,
}

impl SourceFile {
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self {
        let bytes = bytes.into();
        let digest = ContentHash::of(&bytes);
        Self { bytes, digest }
    }
}

/// Result of building a module; this is what the cache stores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuiltModule {
    pub kind: ModuleKind,

    /// Estimated output size in bytes
    pub size: u64,

    pub dependencies: Vec<DependencyRecord>,
}

/// Locates, reads and builds modules.
#[async_trait]
pub trait ModuleSource: Send + Sync {
    /// Name and version of the source, recorded as a build dependency
    fn name(&self) -> &str;

    /// Resolve `request` issued from `issuer` (or from the project root)
    /// into a stable module identifier.
    async fn resolve(&self, request: &str, issuer: Option<&str>) -> Result<String, BuildError>;

    /// Read the raw bytes of a module
    async fn read(&self, identifier: &str) -> Result<SourceFile, BuildError>;

    /// Parse the module into its kind, size and dependency records
    async fn build(&self, identifier: &str, file: &SourceFile) -> Result<BuiltModule, BuildError>;
}
