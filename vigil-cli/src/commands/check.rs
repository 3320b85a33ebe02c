//! `vigil check` — validate a configuration without running anything.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use vigil_core::config;

/// Arguments for `vigil check`.
#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Configuration file, or a directory of `*.toml` fragments.
    #[arg(long)]
    pub config: PathBuf,
}

impl CheckArgs {
    pub fn run(self) -> Result<()> {
        let cfg = config::load(&self.config)
            .with_context(|| format!("invalid configuration at {}", self.config.display()))?;

        println!(
            "{}: {} resource(s)",
            self.config.display(),
            cfg.resources.len()
        );
        for resource in &cfg.resources {
            let managed = resource
                .exec
                .as_ref()
                .map(|e| !e.command.trim().is_empty())
                .unwrap_or(false);
            println!(
                "  {}: {} backend(s), {} template(s){}",
                resource.name,
                resource.backends.len(),
                resource.templates.len(),
                if managed { ", managed process" } else { "" },
            );
        }
        Ok(())
    }
}
