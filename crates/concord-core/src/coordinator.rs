//! Compare-and-swap updates of versioned records.
//!
//! [`UpdateCoordinator::update_with_version`] re-reads the record inside a
//! store transaction, checks the caller's expected version, and writes with a
//! conditional update. A version mismatch is reported as
//! [`Error::ConcurrencyConflict`] and never retried; only transient storage
//! errors are retried, with linear backoff.

use std::thread;

use serde::Serialize;

use crate::config::RetryPolicy;
use crate::db::{RecordStore, RecordTransaction};
use crate::error::{ConflictDetails, Error, Result, StoreError};
use crate::models::{FieldMap, RecordId, VersionedRecord};
use crate::util::now_millis;

/// A successful compare-and-swap write
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdateOutcome {
    /// The record as stored after the write
    pub record: VersionedRecord,
    pub new_version: i64,
    /// Write timestamp (Unix ms)
    pub timestamp: i64,
    pub changed_fields: Vec<String>,
}

/// How a single attempt ended
enum Attempt {
    Success(UpdateOutcome),
    Conflict(ConflictDetails),
    Transient(StoreError),
}

pub struct UpdateCoordinator<'s, S> {
    store: &'s S,
    policy: RetryPolicy,
}

impl<'s, S: RecordStore> UpdateCoordinator<'s, S> {
    pub const fn new(store: &'s S, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    pub const fn store(&self) -> &'s S {
        self.store
    }

    /// Apply `changes` to the record with a compare-and-swap write.
    ///
    /// When `expected_version` is given and the stored version differs, no
    /// write is attempted.
    pub fn update_with_version(
        &self,
        record_id: &RecordId,
        changes: &FieldMap,
        expected_version: Option<i64>,
    ) -> Result<UpdateOutcome> {
        if changes.is_empty() {
            return Err(Error::InvalidInput(
                "field changes must not be empty".to_string(),
            ));
        }

        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.attempt(record_id, changes, expected_version)? {
                Attempt::Success(outcome) => {
                    tracing::info!(
                        record_id = %record_id,
                        new_version = outcome.new_version,
                        fields = ?outcome.changed_fields,
                        attempt,
                        "Record updated"
                    );
                    return Ok(outcome);
                }
                Attempt::Conflict(details) => {
                    tracing::warn!(
                        record_id = %record_id,
                        expected_version = details.expected_version,
                        actual_version = ?details.actual_version,
                        fields = ?details.changed_fields,
                        "Concurrency conflict detected"
                    );
                    return Err(Error::ConcurrencyConflict(details));
                }
                Attempt::Transient(source) if attempt >= max_attempts => {
                    tracing::error!(
                        record_id = %record_id,
                        attempts = attempt,
                        fields = ?changes.keys().collect::<Vec<_>>(),
                        error = %source,
                        "Update failed after retries"
                    );
                    return Err(Error::OptimisticLockFailure {
                        record_id: *record_id,
                        attempts: attempt,
                        source,
                    });
                }
                Attempt::Transient(source) => {
                    let delay = self.policy.backoff(attempt);
                    tracing::warn!(
                        record_id = %record_id,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %source,
                        "Transient storage error, retrying"
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
            }
        }
    }

    /// Current version of a record
    pub fn get_current_version(&self, record_id: &RecordId) -> Result<i64> {
        self.store
            .get(record_id)?
            .map(|record| record.version)
            .ok_or(Error::RecordNotFound(*record_id))
    }

    /// Stamp version 1 on a record stored without a version
    pub fn initialize_versioning(&self, record_id: &RecordId) -> Result<bool> {
        if self.store.get(record_id)?.is_none() {
            return Err(Error::RecordNotFound(*record_id));
        }
        let changed = self.store.initialize_version(record_id)?;
        if changed {
            tracing::info!(record_id = %record_id, "Initialized record versioning");
        }
        Ok(changed)
    }

    fn attempt(
        &self,
        record_id: &RecordId,
        changes: &FieldMap,
        expected_version: Option<i64>,
    ) -> Result<Attempt> {
        match self.write_once(record_id, changes, expected_version) {
            Err(Error::Store(error)) if error.is_transient() => Ok(Attempt::Transient(error)),
            other => other,
        }
    }

    fn write_once(
        &self,
        record_id: &RecordId,
        changes: &FieldMap,
        expected_version: Option<i64>,
    ) -> Result<Attempt> {
        let tx = self.store.begin()?;
        let current = tx
            .read(record_id)?
            .ok_or(Error::RecordNotFound(*record_id))?;

        if let Some(expected) = expected_version {
            if expected != current.version {
                return Ok(Attempt::Conflict(ConflictDetails {
                    record_id: *record_id,
                    expected_version: expected,
                    actual_version: Some(current.version),
                    changed_fields: changed_against(&current.fields, changes),
                }));
            }
        }

        let mut fields = current.fields.clone();
        for (field, value) in changes {
            fields.insert(field.clone(), value.clone());
        }

        let timestamp = now_millis();
        let rows = tx.conditional_update(record_id, current.version, &fields, timestamp)?;
        if rows == 0 {
            return Ok(Attempt::Conflict(ConflictDetails {
                record_id: *record_id,
                expected_version: current.version,
                actual_version: None,
                changed_fields: changes.keys().cloned().collect(),
            }));
        }

        let record = tx
            .read(record_id)?
            .ok_or(Error::RecordNotFound(*record_id))?;
        tx.commit()?;

        Ok(Attempt::Success(UpdateOutcome {
            new_version: record.version,
            record,
            timestamp,
            changed_fields: changes.keys().cloned().collect(),
        }))
    }
}

/// Fields whose incoming value differs from what is stored
fn changed_against(stored: &FieldMap, changes: &FieldMap) -> Vec<String> {
    changes
        .iter()
        .filter(|(field, value)| stored.get(field.as_str()) != Some(*value))
        .map(|(field, _)| field.clone())
        .collect()
}
