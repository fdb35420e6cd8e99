//! Main entry point for the application.
//!
//! `arun` queues shell commands and runs them one at a time in submission
//! order. Every submission detaches its own runner process; the SQLite store
//! is the only shared state, so any later invocation can inspect or correct
//! the queue.

mod cli;
mod commands;
mod config;
mod constants;
mod core;
mod db;
mod display;
mod errors;
mod schema;
mod utils;

use clap::Parser;
use cli::Commands;
use errors::Error;
use std::process::ExitCode;
use tracing::warn;

/// Main entry point that initializes and runs the application.
///
/// # Initialization steps:
/// 1. Load environment variables
/// 2. Parse CLI arguments
/// 3. Resolve the home directory and load settings
/// 4. Initialize logging system
/// 5. Dispatch the command
#[tokio::main]
async fn main() -> ExitCode {
    let dotenv = dotenvy::dotenv();
    let cli = cli::Cli::parse();

    match run(cli, dotenv.err()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: cli::Cli, dotenv_error: Option<dotenvy::Error>) -> Result<(), Error> {
    let home = config::resolve_home(cli.home.as_deref())?;
    let settings = config::load_settings(&home, cli.config.as_deref())?;

    // detached runners have no terminal, their diagnostics go to a file
    let is_runner = matches!(cli.command, Commands::Exec { .. });
    let log_level = match (&cli.logging_level, is_runner) {
        (Some(level), _) => level.clone(),
        (None, true) => "info".to_string(),
        (None, false) => settings.logging_level.clone(),
    };
    let log_dir = settings.log_dir();
    utils::init_logging(&log_level, is_runner.then_some(log_dir.as_path()));

    if let Some(e) = dotenv_error.filter(|e| !e.not_found()) {
        warn!("Failed to load .env file: {}", e);
    }

    commands::dispatch(cli.command, &settings).await
}
