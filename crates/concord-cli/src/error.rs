use std::io;

use concord_core::config::ConfigError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] concord_core::Error),
    #[error(transparent)]
    Store(#[from] concord_core::StoreError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid record id: {0}")]
    InvalidRecordId(String),
    #[error("Invalid assignment '{0}', expected field=value")]
    InvalidAssignment(String),
    #[error("Invalid JSON for field '{field}': {source}")]
    InvalidJson {
        field: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{0}")]
    InvalidChoice(String),
    #[error("No field changes given. Use --set field=value or --set-json field=<json>")]
    NoChanges,
    #[error("No session given. Pass --session or set CONCORD_SESSION")]
    MissingSession,
    #[error("Session id cannot be empty")]
    EmptySession,
    #[error("Save left {0} conflicting field(s); see `concord conflicts show`")]
    ConflictsPending(usize),
}
