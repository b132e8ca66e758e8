//! Concord CLI - edit versioned records from the terminal
//!
//! Saves are checked against the version each session started from, and
//! concurrent edits are surfaced as field-level conflicts to resolve.

mod cli;
mod commands;
mod error;


use clap::Parser;
use concord_core::ConcurrencyConfig;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::commands::checkout::run_checkout;
use crate::commands::common::resolve_db_path;
use crate::commands::conflicts::run_conflicts;
use crate::commands::create::run_create;
use crate::commands::recover::run_recover;
use crate::commands::save::run_save;
use crate::commands::show::run_show;
use crate::commands::state::run_state;
use crate::commands::version::run_version;
use crate::error::CliError;

fn main() {
    if let Err(error) = run() {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("concord=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let db_path = resolve_db_path(cli.db_path);
    let config = ConcurrencyConfig::from_env()?;

    match cli.command {
        Commands::Create {
            set,
            set_json,
            json,
        } => run_create(&set, &set_json, json, &db_path)?,
        Commands::Show { id, json } => run_show(&id, json, &db_path)?,
        Commands::Checkout { id, session } => run_checkout(&id, session, &db_path, &config)?,
        Commands::Save {
            id,
            set,
            set_json,
            session,
            json,
        } => run_save(&id, &set, &set_json, session, json, &db_path, &config)?,
        Commands::State { id, session, json } => {
            run_state(&id, session, json, &db_path, &config)?;
        }
        Commands::Recover {
            id,
            client_version,
            json,
        } => run_recover(&id, client_version, json, &db_path, &config)?,
        Commands::Version { id, init } => run_version(&id, init, &db_path, &config)?,
        Commands::Conflicts { command } => run_conflicts(command, &db_path, &config)?,
    }

    Ok(())
}
