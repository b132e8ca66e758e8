//! Field-level three-way conflict detection

use serde_json::Value;

use crate::db::RecordStore;
use crate::error::{Error, Result};
use crate::models::{
    ConflictReport, ConflictType, FieldConflict, FieldMap, RecordHandle, VersionedRecord,
};

/// Compares a client's baseline and incoming values against the stored record
pub struct ConflictDetector<'s, S> {
    store: &'s S,
}

impl<'s, S: RecordStore> ConflictDetector<'s, S> {
    pub const fn new(store: &'s S) -> Self {
        Self { store }
    }

    /// Re-read the record and report every field of `incoming` that collides
    pub fn detect_conflicts(&self, handle: &RecordHandle, incoming: &FieldMap) -> Result<ConflictReport> {
        let current = self
            .store
            .get(&handle.id)?
            .ok_or(Error::RecordNotFound(handle.id))?;
        Ok(detect_against(&current, &handle.original, incoming))
    }
}

/// Detection over already loaded values.
///
/// A field conflicts when someone else changed it (current differs from the
/// baseline) and the incoming value does not already match that change.
pub fn detect_against(
    current: &VersionedRecord,
    original: &FieldMap,
    incoming: &FieldMap,
) -> ConflictReport {
    let conflicts = incoming
        .iter()
        .filter_map(|(field, incoming_value)| {
            let original_value = original.get(field).unwrap_or(&Value::Null);
            let current_value = current.field(field);

            (current_value != original_value && current_value != incoming_value).then(|| {
                FieldConflict {
                    field: field.clone(),
                    original_value: original_value.clone(),
                    current_value: current_value.clone(),
                    incoming_value: incoming_value.clone(),
                    conflict_type: classify(original_value, current_value, incoming_value),
                }
            })
        })
        .collect();

    ConflictReport::new(conflicts, current.version, current.updated_at)
}

/// Classify a conflict by comparing text lengths.
///
/// Only applies when all three values are strings; lengths are in bytes.
pub fn classify(original: &Value, current: &Value, incoming: &Value) -> ConflictType {
    match (original, current, incoming) {
        (Value::String(_), Value::String(current), Value::String(incoming)) => {
            match incoming.len().cmp(&current.len()) {
                std::cmp::Ordering::Greater => ConflictType::TextExpansion,
                std::cmp::Ordering::Less => ConflictType::TextReduction,
                std::cmp::Ordering::Equal => ConflictType::TextModification,
            }
        }
        _ => ConflictType::ValueChange,
    }
}
