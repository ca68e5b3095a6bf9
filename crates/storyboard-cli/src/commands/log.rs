use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use storyboard_core::model::ShotId;
use storyboard_core::storage::RunReport;

use crate::output::format::format_events;
use crate::output::OutputFormat;

#[derive(Args)]
pub struct LogArgs {
    /// run.json, or the directory containing it
    pub report: PathBuf,

    /// Only transitions of this shot (e.g. s1-2)
    #[arg(long)]
    pub shot: Option<String>,
}

pub fn run(args: &LogArgs, format: OutputFormat) -> Result<()> {
    let report = RunReport::load(&args.report)
        .with_context(|| format!("Failed to read run report {}", args.report.display()))?;

    let events: Vec<_> = match &args.shot {
        Some(shot) => {
            let id = ShotId::parse(shot)
                .with_context(|| format!("Invalid shot id '{shot}', expected s<scene>-<index>"))?;
            report.events_for(id).collect()
        }
        None => report.events.iter().collect(),
    };
    print!("{}", format_events(&events, format));
    Ok(())
}
