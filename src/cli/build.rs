//! Build command implementation

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Result};
use clap::Args;
use colored::Colorize;
use tracing::info;

use crate::bundler::{BuildOutcome, Bundler};
use crate::config::Config;
use crate::utils::{format_duration, format_size};

/// Build the project
#[derive(Args, Debug)]
pub struct BuildCommand {
    /// Output directory for the manifest
    #[arg(short, long)]
    pub outdir: Option<PathBuf>,

    /// Skip reading and writing the persistent cache
    #[arg(long)]
    pub no_cache: bool,

    /// Print per-module timings
    #[arg(long)]
    pub profile: bool,
}

impl BuildCommand {
    pub async fn execute(&self, config_path: &str) -> Result<()> {
        let start = Instant::now();

        info!("Loading configuration from {}", config_path);
        let config = Config::load(config_path)?;
        let write_manifest = config.output.manifest;

        eprintln!("{} Building project...", "→".blue());

        let mut bundler = Bundler::new(config, self.into())?;
        let result = match bundler.build().await? {
            BuildOutcome::Completed(result) => result,
            BuildOutcome::Superseded { generation } => {
                bail!("Build generation {} was superseded", generation)
            }
        };

        let manifest = result.manifest();
        if write_manifest {
            manifest.write(&bundler.output_dir())?;
        }
        let persisted = bundler.persist()?;
        info!("Persisted {} cache entries", persisted);

        eprintln!(
            "\n{} Built {} module(s) into {} chunk(s) in {}\n",
            if result.has_errors() { "✗".red().bold() } else { "✓".green().bold() },
            result.modules.len(),
            manifest.chunks.len(),
            format_duration(start.elapsed())
        );

        // Print chunk summary
        for chunk in &manifest.chunks {
            eprintln!(
                "  {} {} {} {}",
                "•".dimmed(),
                chunk.id.cyan(),
                chunk.kind.dimmed(),
                format_size(chunk.size as usize).dimmed()
            );
        }

        let stats = result.stats;
        eprintln!(
            "\n  {} restored, {} built, {} retried\n",
            stats.restored, stats.built, stats.retries
        );

        if self.profile {
            for profile in result.profiles().iter().take(20) {
                eprintln!(
                    "  {:>8.2}ms factory {:>8.2}ms restore {:>8.2}ms build  x{:.2}  {}",
                    profile.factory_ms,
                    profile.restoring_ms,
                    profile.building_ms,
                    profile.parallelism_factor,
                    profile.identifier.dimmed()
                );
            }
            eprintln!();
        }

        for (identifier, warning) in result.warnings() {
            eprintln!("{} {}: {}", "warning".yellow().bold(), identifier, warning);
        }
        let errors = result.errors();
        for (identifier, error) in &errors {
            eprintln!("{} {}: {}", "error".red().bold(), identifier, error);
        }
        if !errors.is_empty() {
            bail!("Build finished with {} error(s)", errors.len());
        }

        Ok(())
    }
}

/// Build options derived from command arguments
#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub outdir: Option<PathBuf>,
    pub cache: bool,
    pub profile: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            outdir: None,
            cache: true,
            profile: false,
        }
    }
}

impl From<&BuildCommand> for BuildOptions {
    fn from(cmd: &BuildCommand) -> Self {
        Self {
            outdir: cmd.outdir.clone(),
            cache: !cmd.no_cache,
            profile: cmd.profile,
        }
    }
}
