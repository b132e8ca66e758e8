//! Conflict sessions and per-record history in the keyed cache

use std::time::Duration;

use crate::cache::{get_json, put_json, Cache};
use crate::error::Result;
use crate::models::{ConflictSession, HistoryEntry, RecordId, SessionId};

pub fn session_key(record_id: &RecordId, session_id: &SessionId) -> String {
    format!("record_conflicts_{record_id}_{session_id}")
}

pub fn history_key(record_id: &RecordId) -> String {
    format!("record_conflict_history_{record_id}")
}

/// Typed access to conflict sessions and history entries
pub struct SessionStore<'c, C: ?Sized> {
    cache: &'c C,
    session_ttl: Duration,
    history_ttl: Duration,
    history_limit: usize,
}

impl<'c, C: Cache + ?Sized> SessionStore<'c, C> {
    pub const fn new(
        cache: &'c C,
        session_ttl: Duration,
        history_ttl: Duration,
        history_limit: usize,
    ) -> Self {
        Self {
            cache,
            session_ttl,
            history_ttl,
            history_limit,
        }
    }

    pub fn load(
        &self,
        record_id: &RecordId,
        session_id: &SessionId,
    ) -> Result<Option<ConflictSession>> {
        get_json(self.cache, &session_key(record_id, session_id))
    }

    /// Store a session, restarting its time-to-live
    pub fn save(&self, session: &ConflictSession) -> Result<()> {
        put_json(
            self.cache,
            &session_key(&session.record_id, &session.session_id),
            session,
            self.session_ttl,
        )
    }

    pub fn forget(&self, record_id: &RecordId, session_id: &SessionId) -> Result<bool> {
        self.cache.forget(&session_key(record_id, session_id))
    }

    /// History entries, oldest first
    pub fn history(&self, record_id: &RecordId) -> Result<Vec<HistoryEntry>> {
        Ok(get_json(self.cache, &history_key(record_id))?.unwrap_or_default())
    }

    /// Append an entry, dropping the oldest beyond the limit.
    ///
    /// An unresolved entry of the same session is replaced, so a session
    /// contributes one entry however many resolution writes failed.
    pub fn append_history(&self, record_id: &RecordId, entry: HistoryEntry) -> Result<()> {
        let mut entries = self.history(record_id)?;
        entries.retain(|existing| existing.resolved || existing.session_id != entry.session_id);
        entries.push(entry);
        if entries.len() > self.history_limit {
            let excess = entries.len() - self.history_limit;
            entries.drain(..excess);
        }

        tracing::debug!(
            record_id = %record_id,
            entries = entries.len(),
            "Appended conflict history entry"
        );
        put_json(self.cache, &history_key(record_id), &entries, self.history_ttl)
    }
}
