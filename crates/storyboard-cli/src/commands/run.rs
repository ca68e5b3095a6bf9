use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use storyboard_core::config::PipelineConfig;
use storyboard_core::model::ScriptInput;
use storyboard_memory::VisualMemory;
use storyboard_pipeline::{offline_capabilities, Pipeline};

use crate::output::format::format_report;
use crate::output::OutputFormat;

#[derive(Args)]
pub struct RunArgs {
    /// Parsed script: scenes, style guide and entities as JSON
    #[arg(long)]
    pub script: PathBuf,

    /// Pipeline config JSON (defaults apply when omitted)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Directory for run.json and events.jsonl
    #[arg(long)]
    pub out: PathBuf,

    /// Visual memory snapshot to continue from; updated after the run
    #[arg(long)]
    pub memory: Option<PathBuf>,

    /// Seed for Vision QA sampling (overrides the config)
    #[arg(long)]
    pub seed: Option<u64>,
}

pub fn run(args: &RunArgs, format: OutputFormat) -> Result<()> {
    let script = std::fs::read_to_string(&args.script)
        .with_context(|| format!("Failed to read script {}", args.script.display()))?;
    let input: ScriptInput = serde_json::from_str(&script)
        .with_context(|| format!("Invalid script JSON in {}", args.script.display()))?;
    if input.scenes.is_empty() {
        anyhow::bail!("Script {} has no scenes", args.script.display());
    }

    let mut config = match &args.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if args.seed.is_some() {
        config.sampling_seed = args.seed;
    }

    let store = match &args.memory {
        Some(path) if path.exists() => Arc::new(
            VisualMemory::load_snapshot(path)
                .with_context(|| format!("Failed to load memory snapshot {}", path.display()))?,
        ),
        _ => Arc::new(VisualMemory::new()),
    };

    let pipeline = Pipeline::with_memory(config, offline_capabilities(), store);
    let token = pipeline.cancellation_token();

    let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
    let report = rt.block_on(async {
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("Cancelling after in-flight attempts finish...");
                token.cancel();
            }
        });
        pipeline.run(&input).await
    });

    let path = report
        .save(&args.out)
        .with_context(|| format!("Failed to write run report to {}", args.out.display()))?;
    if let Some(memory_path) = &args.memory {
        pipeline
            .memory()
            .save_snapshot(memory_path)
            .with_context(|| format!("Failed to save memory snapshot {}", memory_path.display()))?;
    }

    println!("{}", format_report(&report, format));
    eprintln!("Report written to {}", path.display());
    Ok(())
}
