//! Command-line interface for splitpack
//!
//! Provides the main CLI structure using clap with subcommands for:
//! - `build`: Build the chunk graph and write the manifest
//! - `clean`: Remove the persistent cache

mod build;
mod clean;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;

pub use build::{BuildCommand, BuildOptions};
pub use clean::CleanCommand;

/// splitpack - module graph, chunking and split-chunks core of a bundler
#[derive(Parser, Debug)]
#[command(name = "splitpack")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to splitpack.toml config file
    #[arg(short, long, global = true, default_value = crate::config::CONFIG_FILE)]
    pub config: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build the project and write the chunk manifest
    Build(BuildCommand),

    /// Remove the persistent build cache
    Clean(CleanCommand),
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(&self) -> Result<()> {
        print_banner();

        match &self.command {
            Commands::Build(cmd) => cmd.execute(&self.config).await,
            Commands::Clean(cmd) => cmd.execute(&self.config),
        }
    }
}

/// Print the splitpack banner
fn print_banner() {
    eprintln!(
        "\n{} {} {}\n",
        "⚡".cyan(),
        "splitpack".bold().cyan(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
}
