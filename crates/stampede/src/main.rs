//! Stampede - fleet convergence load generator
//!
//! Simulates fleets of configuration-management nodes performing periodic
//! converge runs against a management server and/or a telemetry collector,
//! spreading the load evenly across an interval and profiling every API
//! request it makes.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;
mod converge;
mod error;
mod request_log;
mod scheduler;

use config::Config;
use error::{CliError, CliResult};

/// Stampede CLI application
#[derive(Parser)]
#[command(name = "stampede")]
#[command(about = "Simulate fleets of converging nodes for capacity testing", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file to load
    #[arg(short, long, env = "STAMPEDE_CONFIG")]
    config: Option<PathBuf>,

    /// Number of nodes to simulate (overrides the config file)
    #[arg(long)]
    nodes: Option<usize>,

    /// Minutes between one node's converge runs (overrides the config file)
    #[arg(long)]
    interval: Option<u64>,

    /// Node name prefix (overrides the config file)
    #[arg(long)]
    prefix: Option<String>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands
#[derive(Subcommand)]
enum Commands {
    /// Start the load of converge runs and reports
    Start,

    /// Print an API request profile from stampede request log files
    Report {
        /// Request log files to replay
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Print a full sample configuration
    Init,
}

#[tokio::main]
async fn main() -> CliResult<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Start => {
            let path = cli.config.ok_or_else(|| {
                CliError::Config(
                    "a configuration file is required to start (see `stampede init`)".to_string(),
                )
            })?;
            let mut config = Config::load(&path)?;
            config.apply_overrides(cli.nodes, cli.interval, cli.prefix);
            config.validate()?;
            commands::start::execute(config).await
        }
        Commands::Report { files } => commands::report::execute(&files),
        Commands::Init => {
            commands::init::execute();
            Ok(())
        }
    }
}
