use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use storyboard_core::model::ShotId;
use storyboard_core::storage::RunReport;

use crate::output::format::format_report;
use crate::output::OutputFormat;

#[derive(Args)]
pub struct ShowArgs {
    /// run.json, or the directory containing it
    pub report: PathBuf,

    /// Show a single shot (e.g. s1-2) with its per-attempt scores
    #[arg(long)]
    pub shot: Option<String>,
}

pub fn run(args: &ShowArgs, format: OutputFormat) -> Result<()> {
    let report = RunReport::load(&args.report)
        .with_context(|| format!("Failed to read run report {}", args.report.display()))?;

    let Some(shot) = &args.shot else {
        println!("{}", format_report(&report, format));
        return Ok(());
    };

    let id = ShotId::parse(shot)
        .with_context(|| format!("Invalid shot id '{shot}', expected s<scene>-<index>"))?;
    let outcome = report
        .shot(id)
        .with_context(|| format!("Shot {id} not found in run {}", report.short_id()))?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(outcome).unwrap_or_default());
        }
        OutputFormat::Text => {
            let shot = &outcome.shot;
            println!("Shot:    {}", shot.id);
            println!("Action:  {}", shot.action);
            println!("Camera:  {}", shot.camera);
            println!("State:   {}", shot.state());
            println!("Reason:  {}", shot.reason().unwrap_or("-"));
            println!("Retries: {}", shot.retry_count());
            if let Some(selected) = shot.selected() {
                let marker = if shot.is_degraded() { " (degraded)" } else { "" };
                println!("Result:  {}{marker}", selected.short());
            }
            for attempt in &outcome.attempts {
                println!("\n--- Attempt {} ---", attempt.attempt);
                for c in &attempt.candidates {
                    let vision = c
                        .vision_score
                        .map(|v| format!(" vision {v:.2}"))
                        .unwrap_or_default();
                    println!(
                        "  #{} {:<28} {:?} score {:.2}{vision}",
                        c.variation_index, c.framing, c.verdict, c.combined_score
                    );
                    if let Some(failure) = &c.failure {
                        println!("      {failure}");
                    }
                    for issue in &c.issues {
                        println!("      - {issue}");
                    }
                }
            }
        }
    }
    Ok(())
}
