pub mod log;
pub mod run;
pub mod show;
pub mod stats;
pub mod validate_config;
pub mod version;

use clap::Subcommand;

#[derive(Subcommand)]
pub enum Commands {
    /// Produce a storyboard from a parsed script using the offline capabilities
    Run(run::RunArgs),
    /// Check a pipeline config file and print the resolved settings
    ValidateConfig(validate_config::ValidateConfigArgs),
    /// Show the outcome of a finished run
    Show(show::ShowArgs),
    /// Show aggregate metrics of a finished run
    Stats(stats::StatsArgs),
    /// List shot state transitions of a finished run
    Log(log::LogArgs),
    /// Print version information
    Version,
}
