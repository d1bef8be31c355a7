//! File-system module source
//!
//! Resolves relative requests against the project tree and scans ES module
//! syntax with regular expressions. This is a stand-in for a real parser: it
//! produces the same dependency records a parser would, for the common forms.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, trace};

use super::{BuiltModule, DependencyRecord, ExportsRequest, ModuleSource, SourceFile};
use crate::error::BuildError;
use crate::graph::ModuleKind;
use crate::utils::{path_to_module_id, relative_path};

const EXTERNAL_PREFIX: &str = "external:";

const EXTENSIONS: [&str; 7] = ["js", "ts", "jsx", "tsx", "mjs", "cjs", "json"];

/// `import <clause> from "x"`
static IMPORT_FROM_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"import\s+([\w$]+\s*,\s*)?(\{[^}]*\}|\*\s+as\s+[\w$]+|[\w$]+)\s+from\s+["']([^"']+)["']"#)
        .expect("valid import regex")
});

/// `import "x"`
static SIDE_EFFECT_IMPORT_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"import\s+["']([^"']+)["']"#).expect("valid import regex"));

/// `export * from "x"`, `export * as ns from "x"`, `export { a as b } from "x"`
static EXPORT_FROM_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"export\s+(\*\s+as\s+[\w$]+|\*|\{[^}]*\})\s+from\s+["']([^"']+)["']"#)
        .expect("valid export regex")
});

static REQUIRE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"require\s*\(\s*["']([^"']+)["']\s*\)"#).expect("valid require regex")
});

static DYNAMIC_IMPORT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"import\s*\(\s*["']([^"']+)["']\s*\)"#).expect("valid import() regex")
});

/// `export const x`, `export function x`, `export class x`, ...
static EXPORT_DECL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"export\s+(?:async\s+)?(?:const|let|var|function\*?|class)\s+([\w$]+)"#)
        .expect("valid export regex")
});

static EXPORT_DEFAULT_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"export\s+default\b"#).expect("valid export regex"));

/// `export { a, b as c }`, local or re-exported
static EXPORT_LIST_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"export\s*\{([^}]*)\}"#).expect("valid export regex"));

static COMMONJS_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\bmodule\.exports\b|\bexports\.[\w$]+\s*="#).expect("valid regex"));

/// Types of source file the scanner distinguishes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleType {
    JavaScript,
    TypeScript,
    Css,
    Json,
    Unknown,
}

impl ModuleType {
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default()
            .to_lowercase();
        match ext.as_str() {
            "js" | "mjs" | "cjs" | "jsx" => ModuleType::JavaScript,
            "ts" | "mts" | "cts" | "tsx" => ModuleType::TypeScript,
            "css" | "scss" | "sass" | "less" => ModuleType::Css,
            "json" => ModuleType::Json,
            _ => ModuleType::Unknown,
        }
    }

    pub fn is_js_like(&self) -> bool {
        matches!(self, ModuleType::JavaScript | ModuleType::TypeScript)
    }
}

/// Module source reading from disk below a project root.
///
/// Identifiers are paths relative to the root (`./src/a.js`), which keeps
/// cache keys portable across checkouts. Bare specifiers become externals.
pub struct FsResolver {
    root: PathBuf,
    name: String,
}

impl FsResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            name: format!("fs-resolver@{}", env!("CARGO_PKG_VERSION")),
        }
    }

    fn absolute(&self, identifier: &str) -> PathBuf {
        self.root.join(identifier)
    }

    /// Identifier of a file under the root, as handed out by `resolve`
    pub fn identifier_for(&self, path: &Path) -> String {
        let relative = relative_path(&self.root, path)
            .map(PathBuf::from)
            .unwrap_or_else(|| path.to_path_buf());
        let id = path_to_module_id(&relative);
        if id.starts_with("../") || id.starts_with('/') {
            id
        } else {
            format!("./{}", id)
        }
    }

    /// Probe the exact path, then known extensions, then `index.*`
    fn probe(&self, target: &Path) -> Option<PathBuf> {
        if target.is_file() {
            return Some(target.to_path_buf());
        }

        for ext in &EXTENSIONS {
            let with_ext = target.with_extension(ext);
            if with_ext.is_file() {
                return Some(with_ext);
            }
        }

        if target.is_dir() {
            for ext in &EXTENSIONS {
                let index = target.join(format!("index.{}", ext));
                if index.is_file() {
                    return Some(index);
                }
            }
        }

        None
    }

    /// Extract dependency records in source order
    pub fn extract_dependencies(source: &str) -> Vec<DependencyRecord> {
        let mut found: Vec<(usize, DependencyRecord)> = Vec::new();

        for cap in IMPORT_FROM_REGEX.captures_iter(source) {
            let start = cap.get(0).map_or(0, |m| m.start());
            let request = cap[3].to_string();
            let mut names = Vec::new();
            if cap.get(1).is_some() {
                names.push("default".to_string());
            }
            let clause = cap[2].trim();
            let exports = if clause.starts_with('*') {
                ExportsRequest::Namespace
            } else if let Some(list) = clause.strip_prefix('{') {
                names.extend(
                    parse_specifiers(list.trim_end_matches('}'))
                        .into_iter()
                        .map(|(imported, _)| imported),
                );
                ExportsRequest::Named(names)
            } else {
                names.push("default".to_string());
                ExportsRequest::Named(names)
            };
            found.push((start, DependencyRecord::new(request, exports)));
        }

        for cap in SIDE_EFFECT_IMPORT_REGEX.captures_iter(source) {
            let start = cap.get(0).map_or(0, |m| m.start());
            found.push((start, DependencyRecord::new(&cap[1], ExportsRequest::SideEffect)));
        }

        for cap in EXPORT_FROM_REGEX.captures_iter(source) {
            let start = cap.get(0).map_or(0, |m| m.start());
            let clause = cap[1].trim();
            let exports = if clause == "*" {
                ExportsRequest::ReexportAll
            } else if clause.starts_with('*') {
                ExportsRequest::Namespace
            } else {
                let list = clause.trim_start_matches('{').trim_end_matches('}');
                ExportsRequest::Reexport(
                    parse_specifiers(list)
                        .into_iter()
                        .map(|(imported, exported)| (exported, imported))
                        .collect(),
                )
            };
            found.push((start, DependencyRecord::new(&cap[2], exports)));
        }

        for cap in REQUIRE_REGEX.captures_iter(source) {
            let start = cap.get(0).map_or(0, |m| m.start());
            found.push((start, DependencyRecord::new(&cap[1], ExportsRequest::Dynamic)));
        }

        for cap in DYNAMIC_IMPORT_REGEX.captures_iter(source) {
            let start = cap.get(0).map_or(0, |m| m.start());
            found.push((start, DependencyRecord::dynamic_import(&cap[1])));
        }

        found.sort_by_key(|(start, _)| *start);
        found.into_iter().map(|(_, record)| record).collect()
    }

    /// Export names declared by an ES module
    pub fn extract_exports(source: &str) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();

        for cap in EXPORT_DECL_REGEX.captures_iter(source) {
            names.push(cap[1].to_string());
        }
        if EXPORT_DEFAULT_REGEX.is_match(source) {
            names.push("default".to_string());
        }
        for cap in EXPORT_LIST_REGEX.captures_iter(source) {
            names.extend(parse_specifiers(&cap[1]).into_iter().map(|(_, exported)| exported));
        }
        for cap in EXPORT_FROM_REGEX.captures_iter(source) {
            if let Some(ns) = cap[1].trim().strip_prefix('*') {
                if let Some(name) = ns.trim().strip_prefix("as") {
                    names.push(name.trim().to_string());
                }
            }
        }

        names.sort();
        names.dedup();
        names
    }
}

/// Parse `a, b as c` into `(a, a)`, `(b, c)` pairs
fn parse_specifiers(list: &str) -> Vec<(String, String)> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|spec| match spec.split_once(" as ") {
            Some((local, exported)) => (local.trim().to_string(), exported.trim().to_string()),
            None => (spec.to_string(), spec.to_string()),
        })
        .collect()
}

#[async_trait]
impl ModuleSource for FsResolver {
    fn name(&self) -> &str {
        &self.name
    }

    async fn resolve(&self, request: &str, issuer: Option<&str>) -> Result<String, BuildError> {
        trace!("Resolving '{}' from {:?}", request, issuer);

        let is_relative = request.starts_with('.') || request.starts_with('/');
        if issuer.is_some() && !is_relative {
            debug!("Treating bare specifier as external: {}", request);
            return Ok(format!("{}{}", EXTERNAL_PREFIX, request));
        }

        let base_dir = match issuer {
            Some(issuer) => self
                .absolute(issuer)
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| self.root.clone()),
            None => self.root.clone(),
        };

        let target = if request.starts_with('/') {
            PathBuf::from(request)
        } else {
            base_dir.join(request)
        };

        match self.probe(&target) {
            Some(path) => Ok(self.identifier_for(&path)),
            None => Err(BuildError::resolve(request, issuer, "no such file")),
        }
    }

    async fn read(&self, identifier: &str) -> Result<SourceFile, BuildError> {
        if let Some(request) = identifier.strip_prefix(EXTERNAL_PREFIX) {
            return Ok(SourceFile::new(request.as_bytes().to_vec()));
        }

        let path = self.absolute(identifier);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| BuildError::io(identifier, &e))?;
        Ok(SourceFile::new(bytes))
    }

    async fn build(&self, identifier: &str, file: &SourceFile) -> Result<BuiltModule, BuildError> {
        if let Some(request) = identifier.strip_prefix(EXTERNAL_PREFIX) {
            return Ok(BuiltModule {
                kind: ModuleKind::External {
                    request: request.to_string(),
                },
                size: 0,
                dependencies: Vec::new(),
            });
        }

        let size = file.bytes.len() as u64;
        let module_type = ModuleType::from_path(Path::new(identifier));

        match module_type {
            ModuleType::Json => {
                serde_json::from_slice::<serde_json::Value>(&file.bytes)
                    .map_err(|e| BuildError::build(identifier, e.to_string()))?;
                Ok(BuiltModule {
                    kind: ModuleKind::Static {
                        provided_exports: vec!["default".to_string()],
                    },
                    size,
                    dependencies: Vec::new(),
                })
            }
            ModuleType::Css => Ok(BuiltModule {
                kind: ModuleKind::Generated {
                    generator: "css".to_string(),
                },
                size,
                dependencies: Vec::new(),
            }),
            ModuleType::JavaScript | ModuleType::TypeScript => {
                let source = std::str::from_utf8(&file.bytes)
                    .map_err(|e| BuildError::build(identifier, e.to_string()))?;
                let dependencies = Self::extract_dependencies(source);
                let provided = Self::extract_exports(source);

                let kind = if provided.is_empty() && COMMONJS_REGEX.is_match(source) {
                    ModuleKind::Dynamic
                } else {
                    ModuleKind::Static {
                        provided_exports: provided,
                    }
                };

                debug!("Found {} dependencies in {}", dependencies.len(), identifier);
                Ok(BuiltModule {
                    kind,
                    size,
                    dependencies,
                })
            }
            ModuleType::Unknown => Err(BuildError::build(identifier, "unsupported module type")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_imports() {
        let source = r#"
            import foo from './foo';
            import { bar, baz as qux } from './bar.js';
            import * as ns from '../ns';
            import './side-effect.css';
            export { qux } from './qux';
            export * from './all';
            const x = require('./x');
            const lazy = import('./lazy');
        "#;

        let deps = FsResolver::extract_dependencies(source);
        let requests: Vec<&str> = deps.iter().map(|d| d.request.as_str()).collect();
        assert_eq!(
            requests,
            vec![
                "./foo",
                "./bar.js",
                "../ns",
                "./side-effect.css",
                "./qux",
                "./all",
                "./x",
                "./lazy"
            ]
        );

        assert_eq!(deps[0].exports, ExportsRequest::Named(vec!["default".to_string()]));
        assert_eq!(
            deps[1].exports,
            ExportsRequest::Named(vec!["bar".to_string(), "baz".to_string()])
        );
        assert_eq!(deps[2].exports, ExportsRequest::Namespace);
        assert_eq!(deps[3].exports, ExportsRequest::SideEffect);
        assert_eq!(
            deps[4].exports,
            ExportsRequest::Reexport(vec![("qux".to_string(), "qux".to_string())])
        );
        assert_eq!(deps[5].exports, ExportsRequest::ReexportAll);
        assert_eq!(deps[6].exports, ExportsRequest::Dynamic);
        assert!(deps[7].is_async);
        assert!(!deps[6].is_async);
    }

    #[test]
    fn test_extract_exports() {
        let source = r#"
            export const a = 1;
            export async function b() {}
            export class C {}
            const d = 4;
            export { d as e };
            export { f } from './f';
            export * as g from './g';
            export default a;
        "#;
        assert_eq!(
            FsResolver::extract_exports(source),
            vec!["C", "a", "b", "default", "e", "f", "g"]
        );
    }

    #[tokio::test]
    async fn test_resolve_and_build_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src/lib")).unwrap();
        std::fs::write(
            dir.path().join("src/main.js"),
            "import { x } from './lib';\nimport React from 'react';\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("src/lib/index.js"), "export const x = 1;\n").unwrap();

        let resolver = FsResolver::new(dir.path());
        let main = resolver.resolve("./src/main.js", None).await.unwrap();
        assert_eq!(main, "./src/main.js");

        let lib = resolver.resolve("./lib", Some(&main)).await.unwrap();
        assert_eq!(lib, "./src/lib/index.js");

        let react = resolver.resolve("react", Some(&main)).await.unwrap();
        assert_eq!(react, "external:react");

        let file = resolver.read(&main).await.unwrap();
        let built = resolver.build(&main, &file).await.unwrap();
        assert_eq!(built.dependencies.len(), 2);

        let file = resolver.read(&react).await.unwrap();
        let built = resolver.build(&react, &file).await.unwrap();
        assert!(built.kind.is_external());

        let err = resolver.resolve("./missing", Some(&main)).await.unwrap_err();
        assert!(matches!(err, BuildError::Resolve { .. }));
    }
}
