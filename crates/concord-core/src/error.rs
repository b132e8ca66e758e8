//! Error types for concord-core

use rusqlite::ErrorCode;
use serde::Serialize;
use thiserror::Error;

use crate::config::ConfigError;
use crate::models::{RecordId, SessionId};

/// Result type alias using concord-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Result type alias for record store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in concord-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Version mismatch, or a second writer won the compare-and-swap race
    #[error("{0}")]
    ConcurrencyConflict(ConflictDetails),

    /// Transient storage failures persisted through every retry attempt
    #[error("Record {record_id} could not be updated after {attempts} attempts: {source}")]
    OptimisticLockFailure {
        record_id: RecordId,
        attempts: u32,
        #[source]
        source: StoreError,
    },

    /// Resolution requested for a missing or already resolved session
    #[error("No pending conflicts for record {record_id} in session {session_id}")]
    NoPendingConflicts {
        record_id: RecordId,
        session_id: SessionId,
    },

    /// Record not found
    #[error("Record not found: {0}")]
    RecordNotFound(RecordId),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Record store or cache failure
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<rusqlite::Error> for Error {
    fn from(error: rusqlite::Error) -> Self {
        Self::Store(StoreError::from(error))
    }
}

/// Errors raised by the versioned record store and the cache tables
#[derive(Error, Debug)]
pub enum StoreError {
    /// `SQLite` error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A failure that is expected to clear up on its own (busy, timeout)
    #[error("Transient storage error: {0}")]
    Transient(String),

    /// Stored data could not be decoded
    #[error("Corrupt record data: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Whether retrying the same operation may succeed.
    ///
    /// Only lock contention counts; constraint violations, IO failures and
    /// corrupt rows are permanent for the current request.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transient(_) => true,
            Self::Sqlite(rusqlite::Error::SqliteFailure(failure, _)) => matches!(
                failure.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
            ),
            Self::Sqlite(_) | Self::Corrupt(_) => false,
        }
    }
}

/// Details carried by a [`Error::ConcurrencyConflict`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictDetails {
    /// Record the write targeted
    pub record_id: RecordId,
    /// Version the writer expected to replace
    pub expected_version: i64,
    /// Version found in the store, `None` when another writer won the race
    /// between our read and our conditional write
    pub actual_version: Option<i64>,
    /// Fields the rejected write would have changed
    pub changed_fields: Vec<String>,
}

impl ConflictDetails {
    /// Number of versions the writer is behind, when known
    pub fn version_gap(&self) -> Option<i64> {
        self.actual_version
            .map(|actual| actual - self.expected_version)
    }

    /// Whether the rejected write touched `field`
    pub fn has_field_conflict(&self, field: &str) -> bool {
        self.changed_fields.iter().any(|changed| changed == field)
    }
}

impl std::fmt::Display for ConflictDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.actual_version {
            Some(actual) => write!(
                f,
                "Concurrency conflict on record {}: expected version {}, found {}",
                self.record_id, self.expected_version, actual
            ),
            None => write!(
                f,
                "Concurrency conflict on record {}: version {} was replaced by another writer",
                self.record_id, self.expected_version
            ),
        }
    }
}
