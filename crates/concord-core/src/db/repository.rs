//! Versioned record repository

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT

use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use serde_json::Value;

use crate::error::{StoreError, StoreResult};
use crate::models::{FieldMap, RecordId, VersionedRecord};

/// Storage of version-stamped records.
///
/// Every write goes through a [`RecordTransaction`]; the compare-and-swap
/// check lives in the store's conditional update, not in application code.
pub trait RecordStore {
    /// Unit of work returned by [`RecordStore::begin`]
    type Tx<'t>: RecordTransaction
    where
        Self: 't;

    /// Start a unit of work. Dropping it without committing rolls it back.
    fn begin(&self) -> StoreResult<Self::Tx<'_>>;

    /// Read a record outside of any unit of work
    fn get(&self, id: &RecordId) -> StoreResult<Option<VersionedRecord>>;

    /// Stamp version 1 on a record stored without one. Returns whether a row changed.
    fn initialize_version(&self, id: &RecordId) -> StoreResult<bool>;
}

/// Operations available inside one unit of work
pub trait RecordTransaction {
    /// Read a record, seeing this unit's own uncommitted writes
    fn read(&self, id: &RecordId) -> StoreResult<Option<VersionedRecord>>;

    /// Replace `fields` and bump the version, only if the stored version is
    /// still `expected_version`. Returns the number of rows affected.
    fn conditional_update(
        &self,
        id: &RecordId,
        expected_version: i64,
        fields: &FieldMap,
        updated_at: i64,
    ) -> StoreResult<usize>;

    /// Make this unit's writes durable
    fn commit(self) -> StoreResult<()>;
}

/// `SQLite` implementation of `RecordStore`
#[derive(Clone, Copy)]
pub struct SqliteRecordStore<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteRecordStore<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Insert a new record at version 1
    pub fn create(&self, fields: FieldMap) -> StoreResult<VersionedRecord> {
        let record = VersionedRecord::new(fields);
        self.insert(&record)?;
        Ok(record)
    }

    /// Insert a record exactly as given
    pub fn insert(&self, record: &VersionedRecord) -> StoreResult<()> {
        self.conn.execute(
            "INSERT INTO records (id, fields, version, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
            params![
                record.id.as_str(),
                Value::Object(record.fields.clone()),
                record.version,
                record.created_at,
                record.updated_at
            ],
        )?;
        Ok(())
    }

    /// List records, most recently updated first
    pub fn list(&self, limit: usize) -> StoreResult<Vec<VersionedRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, fields, version, created_at, updated_at
             FROM records
             ORDER BY updated_at DESC
             LIMIT ?",
        )?;

        let rows = stmt
            .query_map(params![limit as i64], parse_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter().map(RawRecord::decode).collect()
    }
}

impl RecordStore for SqliteRecordStore<'_> {
    type Tx<'t>
        = SqliteRecordTx<'t>
    where
        Self: 't;

    fn begin(&self) -> StoreResult<Self::Tx<'_>> {
        // IMMEDIATE takes the write lock up front so the read and the
        // conditional update see the same snapshot
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        Ok(SqliteRecordTx { tx })
    }

    fn get(&self, id: &RecordId) -> StoreResult<Option<VersionedRecord>> {
        read_record(self.conn, id)
    }

    fn initialize_version(&self, id: &RecordId) -> StoreResult<bool> {
        let rows = self.conn.execute(
            "UPDATE records SET version = 1 WHERE id = ? AND (version IS NULL OR version < 1)",
            params![id.as_str()],
        )?;
        Ok(rows > 0)
    }
}

/// An open IMMEDIATE transaction on the records table
pub struct SqliteRecordTx<'a> {
    tx: Transaction<'a>,
}

impl RecordTransaction for SqliteRecordTx<'_> {
    fn read(&self, id: &RecordId) -> StoreResult<Option<VersionedRecord>> {
        read_record(&self.tx, id)
    }

    fn conditional_update(
        &self,
        id: &RecordId,
        expected_version: i64,
        fields: &FieldMap,
        updated_at: i64,
    ) -> StoreResult<usize> {
        let rows = self.tx.execute(
            "UPDATE records
             SET fields = ?, version = COALESCE(version, 1) + 1, updated_at = ?
             WHERE id = ? AND COALESCE(version, 1) = ?",
            params![
                Value::Object(fields.clone()),
                updated_at,
                id.as_str(),
                expected_version
            ],
        )?;
        Ok(rows)
    }

    fn commit(self) -> StoreResult<()> {
        self.tx.commit()?;
        Ok(())
    }
}

struct RawRecord {
    id: String,
    fields: Value,
    version: Option<i64>,
    created_at: i64,
    updated_at: i64,
}

impl RawRecord {
    fn decode(self) -> StoreResult<VersionedRecord> {
        let id = self
            .id
            .parse()
            .map_err(|_| StoreError::Corrupt(format!("invalid record id '{}'", self.id)))?;
        let Value::Object(fields) = self.fields else {
            return Err(StoreError::Corrupt(format!(
                "fields of record {} are not a JSON object",
                self.id
            )));
        };

        Ok(VersionedRecord {
            id,
            fields,
            version: self.version.unwrap_or(1),
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn parse_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRecord> {
    Ok(RawRecord {
        id: row.get(0)?,
        fields: row.get(1)?,
        version: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

fn read_record(conn: &Connection, id: &RecordId) -> StoreResult<Option<VersionedRecord>> {
    conn.query_row(
        "SELECT id, fields, version, created_at, updated_at FROM records WHERE id = ?",
        params![id.as_str()],
        parse_row,
    )
    .optional()?
    .map(RawRecord::decode)
    .transpose()
}
