//! Versioned record model

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::util::now_millis;

/// Named field values of a record
pub type FieldMap = serde_json::Map<String, Value>;

/// A unique identifier for a record, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId(Uuid);

impl RecordId {
    /// Create a new unique record ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RecordId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s.trim())?))
    }
}

/// A record whose every successful write bumps `version` by exactly one
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedRecord {
    /// Unique identifier
    pub id: RecordId,
    /// Current field values
    pub fields: FieldMap,
    /// Version stamp, starting at 1
    pub version: i64,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last update timestamp (Unix ms)
    pub updated_at: i64,
}

impl VersionedRecord {
    /// Create a new record at version 1
    #[must_use]
    pub fn new(fields: FieldMap) -> Self {
        let now = now_millis();
        Self {
            id: RecordId::new(),
            fields,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Value of `field`, or null when the record has no such field
    pub fn field(&self, field: &str) -> &Value {
        self.fields.get(field).unwrap_or(&Value::Null)
    }
}

/// What an editing client knows about a record: its id and the field
/// values it started editing from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordHandle {
    pub id: RecordId,
    /// Baseline snapshot taken when the edit started
    pub original: FieldMap,
}

impl RecordHandle {
    pub fn new(id: RecordId, original: FieldMap) -> Self {
        Self { id, original }
    }

    /// Snapshot the given record as the baseline of a new edit
    pub fn from_record(record: &VersionedRecord) -> Self {
        Self {
            id: record.id,
            original: record.fields.clone(),
        }
    }

    /// Baseline value of `field`, or null when it was absent
    pub fn original_value(&self, field: &str) -> &Value {
        self.original.get(field).unwrap_or(&Value::Null)
    }
}
