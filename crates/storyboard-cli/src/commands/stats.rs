use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use storyboard_core::storage::RunReport;

use crate::output::format::format_stats;
use crate::output::OutputFormat;

#[derive(Args)]
pub struct StatsArgs {
    /// run.json, or the directory containing it
    pub report: PathBuf,
}

pub fn run(args: &StatsArgs, format: OutputFormat) -> Result<()> {
    let report = RunReport::load(&args.report)
        .with_context(|| format!("Failed to read run report {}", args.report.display()))?;
    print!("{}", format_stats(&report.stats(), format));
    Ok(())
}
