use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use storyboard_core::config::PipelineConfig;

use crate::output::format::format_config;
use crate::output::OutputFormat;

#[derive(Args)]
pub struct ValidateConfigArgs {
    /// Config file to check
    pub path: PathBuf,
}

pub fn run(args: &ValidateConfigArgs, format: OutputFormat) -> Result<()> {
    let config = PipelineConfig::load(&args.path)
        .with_context(|| format!("Invalid config {}", args.path.display()))?;
    print!("{}", format_config(&config, format));
    Ok(())
}
