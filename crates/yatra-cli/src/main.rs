//! Yatra CLI - device and organiser commands for checkpoint scanning
//!
//! Devices scan and watch through the sync agent; organisers import and audit
//! rosters and follow progress.

mod cli;
mod commands;
mod error;

use std::env;
use std::time::Duration;

use clap::Parser;

use crate::cli::{Cli, Commands};
use crate::commands::common::{agent_config, default_db_path, resolve_device_from_env};
use crate::commands::completions::run_completions;
use crate::commands::import::run_import;
use crate::commands::progress::run_progress;
use crate::commands::scan::run_scan;
use crate::commands::verify::run_verify;
use crate::commands::watch::run_watch;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let directive = "yatra_cli=warn"
        .parse::<tracing_subscriber::filter::Directive>()
        .map_err(|error| CliError::InvalidArgument(format!("log directive: {error}")))?;
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(directive))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Import { roster, db } => {
            let db_path = db.unwrap_or_else(|| default_db_path(|name| env::var(name).ok()));
            run_import(&roster, &db_path)?;
        }
        Commands::Verify {
            roster,
            expected,
            prefix,
            reference,
            json,
        } => {
            run_verify(
                &roster,
                expected,
                prefix.as_deref(),
                reference.as_deref(),
                json,
            )?;
        }
        Commands::Scan {
            subject,
            checkpoint,
            wait,
            agent,
        } => {
            let context = resolve_device_from_env(&cli.device)?;
            let config = agent_config(agent)?;
            run_scan(
                &context,
                &subject,
                checkpoint,
                Duration::from_secs(wait),
                config,
            )
            .await?;
        }
        Commands::Progress { all, json } => {
            let context = resolve_device_from_env(&cli.device)?;
            let config = agent_config(cli::AgentArgs::default())?;
            run_progress(&context, &config, all, json).await?;
        }
        Commands::Watch { agent } => {
            let context = resolve_device_from_env(&cli.device)?;
            let config = agent_config(agent)?;
            run_watch(&context, config).await?;
        }
        Commands::Completions { shell, output } => {
            run_completions(shell, output.as_deref())?;
        }
    }

    Ok(())
}
