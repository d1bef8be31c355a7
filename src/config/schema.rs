//! Configuration schema definitions

use serde::{Deserialize, Serialize};

/// Project metadata configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Project name
    pub name: String,

    /// Project version
    #[serde(default = "default_version")]
    pub version: String,
}

fn default_version() -> String {
    "0.1.0".to_string()
}

/// Output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Output directory
    #[serde(default = "default_output_dir")]
    pub dir: String,

    /// Write a JSON chunk manifest for the templating layer
    #[serde(default = "default_true")]
    pub manifest: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            manifest: true,
        }
    }
}

fn default_output_dir() -> String {
    "dist".to_string()
}

fn default_true() -> bool {
    true
}

/// Build scheduling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Worker slots for factory/build work (0 = number of CPU cores)
    #[serde(default)]
    pub parallelism: usize,

    /// Retries for transient errors before they become resolution errors
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            parallelism: 0,
            max_retries: default_max_retries(),
        }
    }
}

fn default_max_retries() -> u32 {
    2
}

/// Persistent cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Cache directory, relative to the project root
    #[serde(default = "default_cache_dir")]
    pub dir: String,

    /// Extra files whose contents invalidate the whole cache
    #[serde(default)]
    pub build_dependencies: Vec<String>,

    /// Pack files kept before they are compacted into one
    #[serde(default = "default_max_packs")]
    pub max_packs: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: default_cache_dir(),
            build_dependencies: Vec::new(),
            max_packs: default_max_packs(),
        }
    }
}

fn default_cache_dir() -> String {
    ".splitpack-cache".to_string()
}

fn default_max_packs() -> usize {
    8
}

/// Chunk optimization configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationConfig {
    /// Fixed size estimate added to every chunk
    #[serde(default)]
    pub chunk_overhead: u64,

    #[serde(default = "default_true")]
    pub merge_duplicate_chunks: bool,

    /// Drop modules from async chunks that every parent already loads
    #[serde(default)]
    pub remove_available_modules: bool,

    #[serde(default = "default_true")]
    pub remove_empty_chunks: bool,

    #[serde(default)]
    pub split_chunks: SplitChunksConfig,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            chunk_overhead: 0,
            merge_duplicate_chunks: true,
            remove_available_modules: false,
            remove_empty_chunks: true,
            split_chunks: SplitChunksConfig::default(),
        }
    }
}

/// Shared-module extraction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitChunksConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Upper bound on extractions per build
    #[serde(default = "default_max_splits")]
    pub max_splits: usize,

    /// Cache groups in priority order
    #[serde(default = "default_cache_groups")]
    pub cache_groups: Vec<CacheGroupConfig>,
}

impl Default for SplitChunksConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_splits: default_max_splits(),
            cache_groups: default_cache_groups(),
        }
    }
}

fn default_max_splits() -> usize {
    32
}

fn default_cache_groups() -> Vec<CacheGroupConfig> {
    vec![
        CacheGroupConfig {
            name: "vendors".to_string(),
            test: Some(r"node_modules|^external:".to_string()),
            ..CacheGroupConfig::new("vendors")
        },
        CacheGroupConfig::new("shared"),
    ]
}

/// Which chunks a cache group may extract from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkFilter {
    #[default]
    All,
    Initial,
    Async,
}

/// One extraction policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheGroupConfig {
    /// Name given to the first chunk this group extracts
    pub name: String,

    /// Regex over module identifiers; absent matches every module
    #[serde(default)]
    pub test: Option<String>,

    /// A module is extracted once more than this many chunks contain it
    #[serde(default = "default_threshold")]
    pub threshold: usize,

    /// Smallest extracted chunk worth creating
    #[serde(default)]
    pub min_size: u64,

    #[serde(default)]
    pub chunks: ChunkFilter,

    /// Extract every matching module, ignoring threshold and size limits
    #[serde(default)]
    pub enforce: bool,
}

impl CacheGroupConfig {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            test: None,
            threshold: default_threshold(),
            min_size: 0,
            chunks: ChunkFilter::All,
            enforce: false,
        }
    }
}

fn default_threshold() -> usize {
    1
}
