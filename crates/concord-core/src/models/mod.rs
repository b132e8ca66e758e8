//! Data models for Concord

mod conflict;
mod record;
mod session;

pub use conflict::{
    ConflictReport, ConflictSession, ConflictType, FieldConflict, HistoryEntry, ResolutionChoice,
    ResolutionStrategy,
};
pub use record::{FieldMap, RecordHandle, RecordId, VersionedRecord};
pub use session::SessionId;
