//! Keyed cache with per-entry time-to-live.
//!
//! Conflict sessions, conflict history, edit baselines and presence all live
//! here rather than in the records table. Values are JSON text.

mod sqlite;

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

pub use sqlite::SqliteCache;

/// A string-keyed store whose entries expire
pub trait Cache {
    /// Get a live entry
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key` for `ttl`, replacing any previous entry
    fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Remove an entry. Returns whether a live entry was removed.
    fn forget(&self, key: &str) -> Result<bool>;
}

/// Read and decode a JSON entry
pub fn get_json<T, C>(cache: &C, key: &str) -> Result<Option<T>>
where
    T: DeserializeOwned,
    C: Cache + ?Sized,
{
    cache
        .get(key)?
        .map(|raw| serde_json::from_str(&raw))
        .transpose()
        .map_err(Into::into)
}

/// Encode and store a JSON entry
pub fn put_json<T, C>(cache: &C, key: &str, value: &T, ttl: Duration) -> Result<()>
where
    T: Serialize + ?Sized,
    C: Cache + ?Sized,
{
    let raw = serde_json::to_string(value)?;
    cache.put(key, &raw, ttl)
}

/// In-process cache, for tests and single-process embedders
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .values()
            .filter(|(_, expires_at)| *expires_at > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired entry. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, (_, expires_at)| *expires_at > now);
        before - entries.len()
    }
}

impl Cache for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some((value, expires_at)) if *expires_at > Instant::now() => Ok(Some(value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Also sweeps expired entries, so keys that are never read again do
    /// not accumulate
    fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        entries.retain(|_, (_, expires_at)| *expires_at > now);
        entries.insert(key.to_string(), (value.to_string(), now + ttl));
        Ok(())
    }

    fn forget(&self, key: &str) -> Result<bool> {
        let removed = self.entries.lock().remove(key);
        Ok(removed.is_some_and(|(_, expires_at)| expires_at > Instant::now()))
    }
}
