//! splitpack library
//!
//! Core of an incremental bundler: content hashing, a layered build cache,
//! a bounded build scheduler, the module graph with export usage tracking,
//! the chunk graph and the split-chunks optimizer.

pub mod bundler;
pub mod cache;
pub mod chunk;
pub mod cli;
pub mod config;
pub mod error;
pub mod graph;
pub mod hash;
pub mod optimize;
pub mod resolver;
pub mod scheduler;
pub mod utils;

pub use bundler::{BuildOutcome, BuildResult, Bundler, ChangeSet};
pub use cli::Cli;
pub use config::Config;
pub use error::BuildError;
