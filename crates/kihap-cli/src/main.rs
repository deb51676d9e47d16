//! kihap-sync - hosts the Kihap sync scheduler and its operator commands
//!
//! `run` keeps the local database and Supabase in step on an interval; the
//! other subcommands run a single pass or inspect sync state.

mod cli;
mod commands;
mod error;


use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::commands::conflicts::run_conflicts;
use crate::commands::once::run_once;
use crate::commands::reset::run_reset;
use crate::commands::run::run_scheduler;
use crate::commands::status::run_status;
use crate::error::CliError;

const DEFAULT_LOG_FILTER: &str = "kihap=info";

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(error) => {
            eprintln!("Error: {error}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<ExitCode, CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { interval_minutes } => run_scheduler(interval_minutes, cli.db_path).await?,
        Commands::Once { table, json } => {
            let succeeded = run_once(table.as_deref(), json, cli.db_path).await?;
            if !succeeded {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Status { json } => run_status(json, cli.db_path).await?,
        Commands::Reset { table, all } => run_reset(table.as_deref(), all, cli.db_path).await?,
        Commands::Conflicts { limit, json } => run_conflicts(limit, json, cli.db_path).await?,
    }

    Ok(ExitCode::SUCCESS)
}
