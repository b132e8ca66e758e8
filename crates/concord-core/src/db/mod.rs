//! Database layer for Concord

mod connection;
mod migrations;
mod repository;

pub use connection::Database;
pub use repository::{RecordStore, RecordTransaction, SqliteRecordStore, SqliteRecordTx};
