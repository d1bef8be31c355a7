//! Clean command implementation

use anyhow::Result;
use clap::Args;
use colored::Colorize;

use crate::bundler::Bundler;
use crate::config::Config;

/// Remove the persistent build cache
#[derive(Args, Debug)]
pub struct CleanCommand {}

impl CleanCommand {
    pub fn execute(&self, config_path: &str) -> Result<()> {
        let config = Config::load(config_path)?;
        let dir = config.cache_dir();

        if Bundler::clean_cache(&config)? {
            eprintln!("{} Removed {}", "✓".green().bold(), dir.display());
        } else {
            eprintln!("{} No cache at {}", "•".dimmed(), dir.display());
        }
        Ok(())
    }
}
