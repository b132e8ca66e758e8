//! concord-core - Core library for Concord
//!
//! This crate contains the versioned record store, the compare-and-swap
//! update coordinator, and the field-level conflict detection and resolution
//! services used by every Concord interface.

pub mod autosave;
pub mod cache;
pub mod config;
pub mod conflict;
pub mod coordinator;
pub mod db;
pub mod error;
pub mod models;
pub mod util;

pub use autosave::{AutoSaver, CurrentState, EditBaseline, RecoveryStatus, SaveOutcome};
pub use config::{ConcurrencyConfig, RetryPolicy};
pub use conflict::{ConflictDetector, ConflictResolver};
pub use coordinator::{UpdateCoordinator, UpdateOutcome};
pub use error::{ConflictDetails, Error, Result, StoreError};
pub use models::{FieldMap, RecordHandle, RecordId, SessionId, VersionedRecord};
