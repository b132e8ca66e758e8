use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use concord_core::models::ResolutionStrategy;

#[derive(Parser)]
#[command(name = "concord")]
#[command(about = "Edit versioned records and resolve concurrent-edit conflicts")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a new record
    #[command(alias = "new")]
    Create {
        /// Field value as text: field=value
        #[arg(long = "set", value_name = "FIELD=VALUE")]
        set: Vec<String>,
        /// Field value as JSON: field=<json>
        #[arg(long = "set-json", value_name = "FIELD=JSON")]
        set_json: Vec<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a record
    Show {
        /// Record ID
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Start editing a record in a session
    Checkout {
        /// Record ID
        id: String,
        /// Editing session (defaults to CONCORD_SESSION, or a new session)
        #[arg(long)]
        session: Option<String>,
    },
    /// Save field changes made in a session
    Save {
        /// Record ID
        id: String,
        /// Field value as text: field=value
        #[arg(long = "set", value_name = "FIELD=VALUE")]
        set: Vec<String>,
        /// Field value as JSON: field=<json>
        #[arg(long = "set-json", value_name = "FIELD=JSON")]
        set_json: Vec<String>,
        /// Editing session (defaults to CONCORD_SESSION)
        #[arg(long)]
        session: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the record state a reconnecting session needs
    State {
        /// Record ID
        id: String,
        /// Editing session (defaults to CONCORD_SESSION)
        #[arg(long)]
        session: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Check whether a client at a given version is behind
    Recover {
        /// Record ID
        id: String,
        /// Version the client last saw
        #[arg(long, value_name = "N")]
        client_version: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a record's version
    Version {
        /// Record ID
        id: String,
        /// Stamp version 1 on a record stored without one
        #[arg(long)]
        init: bool,
    },
    /// Inspect and resolve conflicts
    Conflicts {
        #[command(subcommand)]
        command: ConflictCommands,
    },
}

#[derive(Subcommand)]
pub enum ConflictCommands {
    /// Show pending conflicts for a session
    Show {
        /// Record ID
        id: String,
        /// Editing session (defaults to CONCORD_SESSION)
        #[arg(long)]
        session: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Resolve conflicts with explicit choices
    Resolve {
        /// Record ID
        id: String,
        /// Choice per field: field=keep_yours|keep_server|merge
        #[arg(long = "choice", value_name = "FIELD=CHOICE", required = true)]
        choices: Vec<String>,
        /// Editing session (defaults to CONCORD_SESSION)
        #[arg(long)]
        session: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Resolve conflicts with a strategy
    Auto {
        /// Record ID
        id: String,
        /// Resolution strategy
        #[arg(long, value_enum, default_value_t = StrategyArg::SmartMerge)]
        strategy: StrategyArg,
        /// Editing session (defaults to CONCORD_SESSION)
        #[arg(long)]
        session: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show recent conflict history for a record
    History {
        /// Record ID
        id: String,
        /// Number of entries to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Drop a session's conflict state
    Clear {
        /// Record ID
        id: String,
        /// Editing session (defaults to CONCORD_SESSION)
        #[arg(long)]
        session: Option<String>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum StrategyArg {
    LastWriteWins,
    FirstWriteWins,
    SmartMerge,
}

impl From<StrategyArg> for ResolutionStrategy {
    fn from(value: StrategyArg) -> Self {
        match value {
            StrategyArg::LastWriteWins => Self::LastWriteWins,
            StrategyArg::FirstWriteWins => Self::FirstWriteWins,
            StrategyArg::SmartMerge => Self::SmartMerge,
        }
    }
}
