use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

mod commands;
mod output;

#[derive(Parser)]
#[command(
    name = "storyboard",
    version,
    about = "Produce consistent storyboard frames from a parsed script under a hard budget"
)]
struct Cli {
    /// Increase verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    format: output::OutputFormat,

    #[command(subcommand)]
    command: commands::Commands,
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match &cli.command {
        commands::Commands::Run(args) => commands::run::run(args, cli.format),
        commands::Commands::ValidateConfig(args) => commands::validate_config::run(args, cli.format),
        commands::Commands::Show(args) => commands::show::run(args, cli.format),
        commands::Commands::Stats(args) => commands::stats::run(args, cli.format),
        commands::Commands::Log(args) => commands::log::run(args, cli.format),
        commands::Commands::Version => commands::version::run(),
    }
}
