//! cadence - adaptive periodic job scheduler runner
//!
//! Runs a set of periodic jobs on the threaded timer dispatcher, with the
//! adaptive controller rescaling their periods from dispatcher load, and
//! reports scheduler metrics while it runs.

#![deny(unused_must_use)]
#![deny(clippy::unwrap_used)]

mod config;
mod error;
mod output;
mod run;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::RunConfig;
use crate::error::CliError;
use crate::run::RunOptions;

#[derive(Parser)]
#[command(name = "cadence")]
#[command(about = "Adaptive, deadline-aware periodic job scheduler")]
#[command(version)]
struct Cli {
    /// Output in JSON format for machine parsing
    #[arg(long, global = true)]
    json: bool,

    /// Verbose logging
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the configured jobs and report metrics
    Run {
        /// JSON configuration file (defaults to the built-in A/B/C job set)
        #[arg(short, long, env = "CADENCE_CONFIG")]
        config: Option<PathBuf>,

        /// How long to run before shutting down
        #[arg(long, default_value_t = 10)]
        duration_secs: u64,

        /// Time between metrics reports
        #[arg(long, default_value_t = 2000)]
        report_interval_ms: u64,
    },

    /// Print the default configuration as JSON
    Config,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("cadence={log_level},cadence_scheduler={log_level}").into()
            }),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    match execute_command(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if cli.json {
                output::print_error_json(&e);
            } else {
                output::print_error_human(&e);
            }

            let exit_code = e.downcast_ref::<CliError>().map_or(1, CliError::exit_code);
            ExitCode::from(exit_code)
        }
    }
}

fn execute_command(cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::Run {
            config,
            duration_secs,
            report_interval_ms,
        } => {
            let config = match config {
                Some(path) => RunConfig::load(path)?,
                None => RunConfig::default(),
            };
            let options = RunOptions {
                duration: Duration::from_secs(*duration_secs),
                report_interval: Duration::from_millis(*report_interval_ms),
                json: cli.json,
            };
            run::execute(&config, &options)
        }
        Commands::Config => {
            let text = serde_json::to_string_pretty(&RunConfig::default())
                .map_err(CliError::from)?;
            println!("{text}");
            Ok(())
        }
    }
}
