//! Conflict report, session and resolution models

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use super::{FieldMap, RecordId, SessionId};
use crate::util::now_millis;

/// How a colliding field differs from the server value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    /// Incoming text is longer than the server text
    TextExpansion,
    /// Incoming text is shorter than the server text
    TextReduction,
    /// Same length, different text
    TextModification,
    /// Anything that is not a string on all three sides
    ValueChange,
}

impl ConflictType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TextExpansion => "text_expansion",
            Self::TextReduction => "text_reduction",
            Self::TextModification => "text_modification",
            Self::ValueChange => "value_change",
        }
    }

    pub const fn is_text(self) -> bool {
        !matches!(self, Self::ValueChange)
    }
}

impl fmt::Display for ConflictType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One colliding field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldConflict {
    pub field: String,
    /// Value the editing client started from
    pub original_value: Value,
    /// Value in the store at detection time
    pub current_value: Value,
    /// Value the client tried to write
    pub incoming_value: Value,
    pub conflict_type: ConflictType,
}

/// Output of conflict detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictReport {
    pub conflicts: Vec<FieldConflict>,
    pub has_conflicts: bool,
    pub total_conflicts: usize,
    /// Record version observed during detection
    pub model_version: i64,
    /// Record `updated_at` observed during detection (Unix ms)
    pub last_modified: i64,
}

impl ConflictReport {
    pub fn new(conflicts: Vec<FieldConflict>, model_version: i64, last_modified: i64) -> Self {
        Self {
            has_conflicts: !conflicts.is_empty(),
            total_conflicts: conflicts.len(),
            conflicts,
            model_version,
            last_modified,
        }
    }

    pub fn conflict(&self, field: &str) -> Option<&FieldConflict> {
        self.conflicts.iter().find(|conflict| conflict.field == field)
    }

    pub fn field_names(&self) -> Vec<String> {
        self.conflicts
            .iter()
            .map(|conflict| conflict.field.clone())
            .collect()
    }
}

/// Pending conflict state of one editing client on one record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictSession {
    pub record_id: RecordId,
    pub session_id: SessionId,
    pub report: ConflictReport,
    /// Incoming values that did not collide, written with the resolution
    #[serde(default)]
    pub pending_fields: FieldMap,
    /// Fields already written by earlier partial resolutions
    #[serde(default)]
    pub resolved_fields: Vec<String>,
    pub resolved: bool,
    pub resolved_at: Option<i64>,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
}

impl ConflictSession {
    pub fn new(
        record_id: RecordId,
        session_id: SessionId,
        report: ConflictReport,
        pending_fields: FieldMap,
    ) -> Self {
        Self {
            record_id,
            session_id,
            report,
            pending_fields,
            resolved_fields: Vec::new(),
            resolved: false,
            resolved_at: None,
            created_at: now_millis(),
        }
    }

    pub const fn is_pending(&self) -> bool {
        !self.resolved && self.report.has_conflicts
    }
}

/// One entry of a record's conflict history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub session_id: SessionId,
    /// Unix ms
    pub timestamp: i64,
    pub conflict_count: usize,
    pub resolved: bool,
}

/// A user's answer for one conflicting field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionChoice {
    KeepYours,
    KeepServer,
    Merge,
}

impl ResolutionChoice {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::KeepYours => "keep_yours",
            Self::KeepServer => "keep_server",
            Self::Merge => "merge",
        }
    }
}

impl fmt::Display for ResolutionChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResolutionChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "keep_yours" | "yours" => Ok(Self::KeepYours),
            "keep_server" | "server" => Ok(Self::KeepServer),
            "merge" => Ok(Self::Merge),
            other => Err(format!(
                "unknown resolution choice '{other}' (expected keep_yours, keep_server or merge)"
            )),
        }
    }
}

/// Non-interactive resolution policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    LastWriteWins,
    FirstWriteWins,
    SmartMerge,
}

impl ResolutionStrategy {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LastWriteWins => "last_write_wins",
            Self::FirstWriteWins => "first_write_wins",
            Self::SmartMerge => "smart_merge",
        }
    }
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
