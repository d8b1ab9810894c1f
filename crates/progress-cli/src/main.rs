//! `progress` - drive, watch, and inspect tracked batch jobs.

mod error;
mod history;
mod run;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use progress_core::config::TrackerConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::CliResult;
use crate::history::HistoryArgs;
use crate::run::RunArgs;

#[derive(Parser, Debug)]
#[command(name = "progress", version, about = "Progress tracking for long-running batch jobs")]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a simulated seed job and stream its progress frames to stdout
    Run(RunArgs),
    /// List tasks archived by the sweeper
    History(HistoryArgs),
    /// Load, validate, and print the resolved tracker configuration
    CheckConfig {
        /// Configuration file path (overrides PROGRESS_CONFIG)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let outcome = match cli.command {
        Command::Run(args) => run::execute(args).await,
        Command::History(args) => history::execute(args).await,
        Command::CheckConfig { config } => check_config(config),
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(error = %error, "command failed");
            ExitCode::FAILURE
        }
    }
}

fn check_config(path: Option<PathBuf>) -> CliResult<()> {
    let config = TrackerConfig::load(path.as_deref())?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

// Frames go to stdout, so logs are kept on stderr.
fn init_logging(verbose: bool) {
    let filter = if verbose {
        "progress_core=debug,progress=debug,info"
    } else {
        "info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}
