//! `SQLite` backed cache, shared by every process that opens the database

#![allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]

use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension};

use super::Cache;
use crate::error::Result;
use crate::util::now_millis;

/// `SQLite` implementation of `Cache` over the `cache_entries` table
#[derive(Clone, Copy)]
pub struct SqliteCache<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteCache<'a> {
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Delete every expired entry. Returns the number removed.
    pub fn purge_expired(&self) -> Result<usize> {
        let removed = self.conn.execute(
            "DELETE FROM cache_entries WHERE expires_at <= ?",
            params![now_millis()],
        )?;
        if removed > 0 {
            tracing::debug!(count = removed, "Purged expired cache entries");
        }
        Ok(removed)
    }
}

impl Cache for SqliteCache<'_> {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM cache_entries WHERE key = ? AND expires_at > ?",
                params![key, now_millis()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let expires_at = now_millis().saturating_add(ttl.as_millis() as i64);
        self.conn.execute(
            "INSERT INTO cache_entries (key, value, expires_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
            params![key, value, expires_at],
        )?;
        Ok(())
    }

    fn forget(&self, key: &str) -> Result<bool> {
        let removed = self.conn.execute(
            "DELETE FROM cache_entries WHERE key = ? AND expires_at > ?",
            params![key, now_millis()],
        )?;
        // Clear an expired leftover under the same key too
        self.conn
            .execute("DELETE FROM cache_entries WHERE key = ?", params![key])?;
        Ok(removed > 0)
    }
}
