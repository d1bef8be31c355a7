//! In-memory module source
//!
//! Modules are declared up front with their dependency records, which makes
//! this source handy for embedding the core and for tests.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use super::{BuiltModule, DependencyRecord, ExportsRequest, ModuleSource, SourceFile};
use crate::error::BuildError;
use crate::graph::ModuleKind;
use crate::utils::clean_path;

/// Declaration of one in-memory module.
#[derive(Debug, Clone)]
pub struct MemoryModule {
    source: Vec<u8>,
    size: Option<u64>,
    kind: ModuleKind,
    dependencies: Vec<DependencyRecord>,
    build_error: Option<String>,
}

impl MemoryModule {
    /// A static ES module without exports
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into().into_bytes(),
            size: None,
            kind: ModuleKind::Static {
                provided_exports: Vec::new(),
            },
            dependencies: Vec::new(),
            build_error: None,
        }
    }

    /// Declare the provided export names
    pub fn exports(mut self, names: &[&str]) -> Self {
        self.kind = ModuleKind::Static {
            provided_exports: names.iter().map(|n| n.to_string()).collect(),
        };
        self
    }

    pub fn kind(mut self, kind: ModuleKind) -> Self {
        self.kind = kind;
        self
    }

    /// Override the size estimate (defaults to the source length)
    pub fn size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn dependency(mut self, record: DependencyRecord) -> Self {
        self.dependencies.push(record);
        self
    }

    /// `import { names } from request`
    pub fn import(self, request: &str, names: &[&str]) -> Self {
        self.dependency(DependencyRecord::named(request, names))
    }

    /// `import(request)`
    pub fn dynamic_import(self, request: &str) -> Self {
        self.dependency(DependencyRecord::dynamic_import(request))
    }

    /// `export * from request`
    pub fn reexport_all(self, request: &str) -> Self {
        self.dependency(DependencyRecord::new(request, ExportsRequest::ReexportAll))
    }

    /// Make `build` fail with the given reason
    pub fn failing(mut self, reason: &str) -> Self {
        self.build_error = Some(reason.to_string());
        self
    }
}

/// A [`ModuleSource`] backed by a map of identifiers to declarations.
#[derive(Debug, Default)]
pub struct MemorySource {
    modules: RwLock<BTreeMap<String, MemoryModule>>,

    /// Remaining transient read failures per identifier
    flaky: Mutex<HashMap<String, u32>>,

    latency: Option<Duration>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every read, to widen overlap between tasks
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn with_module(self, identifier: &str, module: MemoryModule) -> Self {
        self.insert(identifier, module);
        self
    }

    pub fn insert(&self, identifier: &str, module: MemoryModule) {
        self.modules.write().insert(clean_path(identifier), module);
    }

    pub fn remove(&self, identifier: &str) {
        self.modules.write().remove(&clean_path(identifier));
    }

    /// Fail the next `times` reads of `identifier` with a transient error
    pub fn fail_reads(&self, identifier: &str, times: u32) {
        self.flaky.lock().insert(clean_path(identifier), times);
    }

    fn join(request: &str, issuer: Option<&str>) -> String {
        let relative = request.starts_with("./") || request.starts_with("../");
        match issuer.and_then(|i| i.rsplit_once('/')) {
            Some((dir, _)) if relative => clean_path(&format!("{}/{}", dir, request)),
            _ => clean_path(request),
        }
    }
}

#[async_trait]
impl ModuleSource for MemorySource {
    fn name(&self) -> &str {
        "memory"
    }

    async fn resolve(&self, request: &str, issuer: Option<&str>) -> Result<String, BuildError> {
        let identifier = Self::join(request, issuer);
        if self.modules.read().contains_key(&identifier) {
            Ok(identifier)
        } else {
            Err(BuildError::resolve(request, issuer, "module not found"))
        }
    }

    async fn read(&self, identifier: &str) -> Result<SourceFile, BuildError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        {
            let mut flaky = self.flaky.lock();
            if let Some(remaining) = flaky.get_mut(identifier) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(BuildError::Io {
                        identifier: identifier.to_string(),
                        reason: "resource temporarily unavailable".to_string(),
                        transient: true,
                    });
                }
            }
        }

        let modules = self.modules.read();
        let module = modules.get(identifier).ok_or_else(|| BuildError::Io {
            identifier: identifier.to_string(),
            reason: "module vanished".to_string(),
            transient: true,
        })?;
        Ok(SourceFile::new(module.source.clone()))
    }

    async fn build(&self, identifier: &str, file: &SourceFile) -> Result<BuiltModule, BuildError> {
        let modules = self.modules.read();
        let module = modules
            .get(identifier)
            .ok_or_else(|| BuildError::build(identifier, "module vanished"))?;

        if let Some(reason) = &module.build_error {
            return Err(BuildError::build(identifier, reason.clone()));
        }

        Ok(BuiltModule {
            kind: module.kind.clone(),
            size: module.size.unwrap_or(file.bytes.len() as u64),
            dependencies: module.dependencies.clone(),
        })
    }
}
