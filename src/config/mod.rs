//! Configuration handling for splitpack
//!
//! Parses and manages splitpack.toml configuration files.

mod schema;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

pub use schema::*;

/// Default configuration file name
pub const CONFIG_FILE: &str = "splitpack.toml";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Project metadata
    pub project: ProjectConfig,

    /// Entry points for bundling, ordered by name
    #[serde(default)]
    pub entrypoints: BTreeMap<String, String>,

    /// Output configuration
    #[serde(default)]
    pub output: OutputConfig,

    /// Scheduling configuration
    #[serde(default)]
    pub build: BuildConfig,

    /// Persistent cache configuration
    #[serde(default)]
    pub cache: CacheConfig,

    /// Chunk optimization configuration
    #[serde(default)]
    pub optimization: OptimizationConfig,

    /// Root directory (computed from config file location)
    #[serde(skip)]
    pub root: PathBuf,

    /// The file this configuration was read from
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from a file path
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let canonical_path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()?.join(path)
        };

        let content = fs::read_to_string(&canonical_path)
            .with_context(|| format!("Failed to read config file: {}", canonical_path.display()))?;

        let mut config = Self::parse(&content)
            .with_context(|| format!("Failed to parse {}", canonical_path.display()))?;

        // Set root directory to the directory containing the config file
        config.root = canonical_path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        config.source_path = Some(canonical_path);

        Ok(config)
    }

    /// Parse and validate configuration text
    pub fn parse(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content)?;
        config.root = PathBuf::from(".");
        config.validate()?;
        Ok(config)
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            project: ProjectConfig {
                name: "my-app".to_string(),
                version: "0.1.0".to_string(),
            },
            entrypoints: BTreeMap::from([("main".to_string(), "./src/main.js".to_string())]),
            output: OutputConfig::default(),
            build: BuildConfig::default(),
            cache: CacheConfig::default(),
            optimization: OptimizationConfig::default(),
            root: PathBuf::from("."),
            source_path: None,
        }
    }

    /// Replace the entrypoints, e.g. when embedding the core
    pub fn with_entrypoints<'a>(mut self, entries: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        self.entrypoints = entries
            .into_iter()
            .map(|(name, request)| (name.to_string(), request.to_string()))
            .collect();
        self
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        // Ensure at least one entrypoint exists
        if self.entrypoints.is_empty() {
            anyhow::bail!("At least one entrypoint must be specified in {}", CONFIG_FILE);
        }

        for group in &self.optimization.split_chunks.cache_groups {
            if let Some(test) = &group.test {
                Regex::new(test).with_context(|| {
                    format!("Invalid test pattern for cache group '{}'", group.name)
                })?;
            }
        }

        Ok(())
    }

    /// Get the absolute output directory path
    pub fn output_dir(&self) -> PathBuf {
        self.root.join(&self.output.dir)
    }

    /// Get the absolute cache directory path
    pub fn cache_dir(&self) -> PathBuf {
        self.root.join(&self.cache.dir)
    }

    /// Declared build dependencies, including the config file itself
    pub fn build_dependency_paths(&self) -> Vec<PathBuf> {
        self.source_path
            .iter()
            .cloned()
            .chain(self.cache.build_dependencies.iter().map(|p| self.root.join(p)))
            .collect()
    }
}
