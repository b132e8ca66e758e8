//! Edit sessions on top of the coordinator and the resolver.
//!
//! An editing client checks out a baseline with [`AutoSaver::begin_edit`]
//! and saves field changes against it. A stale save runs conflict detection:
//! when no field actually collides the changes are re-applied on the fresh
//! version, otherwise a conflict session is opened for the client to resolve.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::{get_json, put_json, Cache};
use crate::config::ConcurrencyConfig;
use crate::conflict::{AutoResolution, ConflictDetector, ConflictResolver, ResolutionOutcome};
use crate::coordinator::{UpdateCoordinator, UpdateOutcome};
use crate::db::RecordStore;
use crate::error::{ConflictDetails, Error, Result};
use crate::models::{
    ConflictSession, FieldMap, RecordHandle, RecordId, ResolutionChoice, ResolutionStrategy,
    SessionId, VersionedRecord,
};
use crate::util::now_millis;

/// Columns managed by the store that clients may not write
const RESERVED_FIELDS: [&str; 4] = ["id", "version", "created_at", "updated_at"];

/// What a session last saw of a record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditBaseline {
    pub record_id: RecordId,
    pub session_id: SessionId,
    pub version: i64,
    pub fields: FieldMap,
    /// Unix ms
    pub started_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SaveOutcome {
    Saved {
        record: VersionedRecord,
        version: i64,
        timestamp: i64,
        fields: Vec<String>,
    },
    Conflict {
        session: ConflictSession,
        expected_version: i64,
        current_version: i64,
    },
    /// The session already has unresolved conflicts; the changes were added
    /// to it and nothing was written
    Held { session: ConflictSession },
}

impl SaveOutcome {
    fn saved(outcome: UpdateOutcome) -> Self {
        Self::Saved {
            version: outcome.new_version,
            timestamp: outcome.timestamp,
            fields: outcome.changed_fields,
            record: outcome.record,
        }
    }
}

/// One session's recent activity on a record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceEntry {
    pub session_id: SessionId,
    /// Unix ms
    pub last_activity: i64,
    pub active_fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurrentState {
    pub record_id: RecordId,
    pub version: i64,
    pub last_modified: i64,
    pub fields: FieldMap,
    pub pending_conflicts: Option<ConflictSession>,
    pub active_sessions: Vec<PresenceEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecoveryStatus {
    pub record_id: RecordId,
    pub client_version: i64,
    pub current_version: i64,
    pub recovery_needed: bool,
    pub version_gap: i64,
}

pub fn baseline_key(record_id: &RecordId, session_id: &SessionId) -> String {
    format!("edit_baseline_{record_id}_{session_id}")
}

pub fn presence_key(record_id: &RecordId) -> String {
    format!("edit_presence_{record_id}")
}

pub struct AutoSaver<'a, S, C: ?Sized> {
    store: &'a S,
    cache: &'a C,
    coordinator: UpdateCoordinator<'a, S>,
    resolver: ConflictResolver<'a, S, C>,
    config: ConcurrencyConfig,
}

impl<'a, S: RecordStore, C: Cache + ?Sized> AutoSaver<'a, S, C> {
    pub fn new(store: &'a S, cache: &'a C, config: &ConcurrencyConfig) -> Self {
        Self {
            store,
            cache,
            coordinator: UpdateCoordinator::new(store, config.retry),
            resolver: ConflictResolver::new(store, cache, config),
            config: config.clone(),
        }
    }

    /// Replace the resolver, e.g. one configured with field labels
    #[must_use]
    pub fn with_resolver(mut self, resolver: ConflictResolver<'a, S, C>) -> Self {
        self.resolver = resolver;
        self
    }

    pub const fn resolver(&self) -> &ConflictResolver<'a, S, C> {
        &self.resolver
    }

    pub const fn coordinator(&self) -> &UpdateCoordinator<'a, S> {
        &self.coordinator
    }

    /// Snapshot the record as this session's baseline
    pub fn begin_edit(&self, record_id: &RecordId, session_id: &SessionId) -> Result<EditBaseline> {
        let record = self
            .store
            .get(record_id)?
            .ok_or(Error::RecordNotFound(*record_id))?;
        let baseline = self.store_baseline(&record, session_id)?;

        tracing::info!(
            record_id = %record_id,
            session_id = %session_id,
            version = record.version,
            "Started edit session"
        );
        Ok(baseline)
    }

    pub fn baseline(
        &self,
        record_id: &RecordId,
        session_id: &SessionId,
    ) -> Result<Option<EditBaseline>> {
        get_json(self.cache, &baseline_key(record_id, session_id))
    }

    pub fn save_field(
        &self,
        record_id: &RecordId,
        session_id: &SessionId,
        field: &str,
        value: Value,
    ) -> Result<SaveOutcome> {
        let mut changes = FieldMap::new();
        changes.insert(field.to_string(), value);
        self.save_fields(record_id, session_id, changes)
    }

    /// Save changes against the session's baseline
    pub fn save_fields(
        &self,
        record_id: &RecordId,
        session_id: &SessionId,
        changes: FieldMap,
    ) -> Result<SaveOutcome> {
        let baseline = self.baseline(record_id, session_id)?.ok_or_else(|| {
            Error::InvalidInput(format!(
                "no edit in progress for session {session_id}; begin an edit first"
            ))
        })?;

        let handle = RecordHandle::new(*record_id, baseline.fields);
        let outcome = self.save_with_handle(&handle, Some(baseline.version), session_id, changes)?;

        if let SaveOutcome::Saved { record, .. } = &outcome {
            self.refresh_baseline(record, session_id);
        }
        Ok(outcome)
    }

    /// Save changes for a caller that tracks its own baseline
    pub fn save_with_handle(
        &self,
        handle: &RecordHandle,
        expected_version: Option<i64>,
        session_id: &SessionId,
        changes: FieldMap,
    ) -> Result<SaveOutcome> {
        validate_changes(&changes)?;

        // The baseline must not move past conflicts the client has not answered
        if let Some(session) = self
            .resolver
            .hold_changes(&handle.id, session_id, &changes)?
        {
            return Ok(SaveOutcome::Held { session });
        }

        match self
            .coordinator
            .update_with_version(&handle.id, &changes, expected_version)
        {
            Ok(outcome) => {
                self.touch_presence(&handle.id, session_id, &outcome.changed_fields)?;
                tracing::debug!(
                    record_id = %handle.id,
                    session_id = %session_id,
                    version = outcome.new_version,
                    "Saved fields"
                );
                Ok(SaveOutcome::saved(outcome))
            }
            Err(Error::ConcurrencyConflict(details)) => {
                self.handle_conflict(handle, session_id, changes, &details)
            }
            Err(error) => Err(error),
        }
    }

    fn handle_conflict(
        &self,
        handle: &RecordHandle,
        session_id: &SessionId,
        changes: FieldMap,
        details: &ConflictDetails,
    ) -> Result<SaveOutcome> {
        let report = ConflictDetector::new(self.store).detect_conflicts(handle, &changes)?;

        if !report.has_conflicts {
            tracing::info!(
                record_id = %handle.id,
                session_id = %session_id,
                version = report.model_version,
                "No field collisions, re-applying changes on the current version"
            );
            let outcome =
                self.coordinator
                    .update_with_version(&handle.id, &changes, Some(report.model_version))?;
            self.touch_presence(&handle.id, session_id, &outcome.changed_fields)?;
            return Ok(SaveOutcome::saved(outcome));
        }

        let pending: FieldMap = changes
            .into_iter()
            .filter(|(field, _)| report.conflict(field).is_none())
            .collect();
        let current_version = report.model_version;
        let session = self
            .resolver
            .open_session(&handle.id, session_id, report, pending)?;

        tracing::warn!(
            record_id = %handle.id,
            session_id = %session_id,
            expected_version = details.expected_version,
            current_version,
            conflicts = ?session.report.field_names(),
            "Save produced conflicts"
        );

        Ok(SaveOutcome::Conflict {
            session,
            expected_version: details.expected_version,
            current_version,
        })
    }

    /// Resolve the session's conflicts and move its baseline to the result
    pub fn resolve_conflicts(
        &self,
        record_id: &RecordId,
        session_id: &SessionId,
        resolutions: &BTreeMap<String, ResolutionChoice>,
    ) -> Result<ResolutionOutcome> {
        let outcome = self
            .resolver
            .resolve_conflicts(record_id, session_id, resolutions)?;
        self.refresh_baseline(&outcome.record, session_id);
        Ok(outcome)
    }

    /// Auto-resolve the session's conflicts and move its baseline when
    /// anything was written
    pub fn auto_resolve_conflicts(
        &self,
        record_id: &RecordId,
        session_id: &SessionId,
        strategy: ResolutionStrategy,
    ) -> Result<AutoResolution> {
        let auto = self
            .resolver
            .auto_resolve_conflicts(record_id, session_id, strategy)?;
        if let Some(outcome) = &auto.resolution {
            self.refresh_baseline(&outcome.record, session_id);
        }
        Ok(auto)
    }

    /// Everything a reconnecting client needs to rebuild its view
    pub fn current_state(&self, record_id: &RecordId, session_id: &SessionId) -> Result<CurrentState> {
        let record = self
            .store
            .get(record_id)?
            .ok_or(Error::RecordNotFound(*record_id))?;

        Ok(CurrentState {
            record_id: *record_id,
            version: record.version,
            last_modified: record.updated_at,
            fields: record.fields,
            pending_conflicts: self.resolver.pending_session(record_id, session_id)?,
            active_sessions: self.active_sessions(record_id)?,
        })
    }

    /// Compare a reconnecting client's version with the stored one
    pub fn check_recovery(&self, record_id: &RecordId, client_version: i64) -> Result<RecoveryStatus> {
        let current_version = self.coordinator.get_current_version(record_id)?;
        let status = RecoveryStatus {
            record_id: *record_id,
            client_version,
            current_version,
            recovery_needed: current_version > client_version,
            version_gap: current_version - client_version,
        };

        if status.recovery_needed {
            tracing::info!(
                record_id = %record_id,
                client_version,
                current_version,
                "Client is behind and needs to recover"
            );
        }
        Ok(status)
    }

    /// Sessions active within the session time-to-live
    pub fn active_sessions(&self, record_id: &RecordId) -> Result<Vec<PresenceEntry>> {
        let entries: Vec<PresenceEntry> =
            get_json(self.cache, &presence_key(record_id))?.unwrap_or_default();
        let cutoff = now_millis() - millis(self.config.session_ttl);
        Ok(entries
            .into_iter()
            .filter(|entry| entry.last_activity > cutoff)
            .collect())
    }

    fn store_baseline(
        &self,
        record: &VersionedRecord,
        session_id: &SessionId,
    ) -> Result<EditBaseline> {
        let baseline = EditBaseline {
            record_id: record.id,
            session_id: session_id.clone(),
            version: record.version,
            fields: record.fields.clone(),
            started_at: now_millis(),
        };
        put_json(
            self.cache,
            &baseline_key(&record.id, session_id),
            &baseline,
            self.config.session_ttl,
        )?;
        Ok(baseline)
    }

    /// Baseline update after a committed write; a cache failure is logged
    /// since the record has already changed
    fn refresh_baseline(&self, record: &VersionedRecord, session_id: &SessionId) {
        if let Err(error) = self.store_baseline(record, session_id) {
            tracing::warn!(
                record_id = %record.id,
                session_id = %session_id,
                error = %error,
                "Could not refresh edit baseline"
            );
        }
    }

    fn touch_presence(
        &self,
        record_id: &RecordId,
        session_id: &SessionId,
        fields: &[String],
    ) -> Result<()> {
        let now = now_millis();
        let window_start = now - millis(self.config.concurrent_edit_window);
        let mut entries = self.active_sessions(record_id)?;

        let touched: BTreeSet<&str> = fields.iter().map(String::as_str).collect();
        for other in entries
            .iter()
            .filter(|entry| &entry.session_id != session_id && entry.last_activity >= window_start)
        {
            let shared: Vec<&str> = other
                .active_fields
                .iter()
                .map(String::as_str)
                .filter(|field| touched.contains(field))
                .collect();
            if !shared.is_empty() {
                tracing::warn!(
                    record_id = %record_id,
                    session_id = %session_id,
                    other_session = %other.session_id,
                    fields = ?shared,
                    "Concurrent editing detected"
                );
            }
        }

        match entries
            .iter_mut()
            .find(|entry| &entry.session_id == session_id)
        {
            Some(entry) => {
                entry.last_activity = now;
                for field in fields {
                    if !entry.active_fields.contains(field) {
                        entry.active_fields.push(field.clone());
                    }
                }
            }
            None => entries.push(PresenceEntry {
                session_id: session_id.clone(),
                last_activity: now,
                active_fields: fields.to_vec(),
            }),
        }

        put_json(
            self.cache,
            &presence_key(record_id),
            &entries,
            self.config.session_ttl,
        )
    }
}

fn validate_changes(changes: &FieldMap) -> Result<()> {
    if changes.is_empty() {
        return Err(Error::InvalidInput("no field changes to save".to_string()));
    }
    for field in changes.keys() {
        if field.trim().is_empty() {
            return Err(Error::InvalidInput("field names must not be empty".to_string()));
        }
        if RESERVED_FIELDS.contains(&field.as_str()) {
            return Err(Error::InvalidInput(format!(
                "field '{field}' is managed by the store"
            )));
        }
    }
    Ok(())
}

fn millis(duration: std::time::Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::cache::MemoryCache;
    use crate::coordinator::tests::fields;
    use crate::db::{Database, SqliteRecordStore};

    fn session(name: &str) -> SessionId {
        SessionId::parse(name).unwrap()
    }

    #[test]
    fn saves_advance_the_baseline() {
        let db = Database::open_in_memory().unwrap();
        let store = SqliteRecordStore::new(db.connection());
        let cache = MemoryCache::new();
        let config = ConcurrencyConfig::default();
        let saver = AutoSaver::new(&store, &cache, &config);
        let record = store.create(fields(json!({"title": "Old"}))).unwrap();
        let tab = session("tab-a");

        saver.begin_edit(&record.id, &tab).unwrap();
        let first = saver
            .save_field(&record.id, &tab, "title", json!("Draft"))
            .unwrap();
        assert!(matches!(first, SaveOutcome::Saved { version: 2, .. }));

        let second = saver
            .save_field(&record.id, &tab, "title", json!("Final"))
            .unwrap();
        assert!(matches!(second, SaveOutcome::Saved { version: 3, .. }));
        assert_eq!(saver.baseline(&record.id, &tab).unwrap().unwrap().version, 3);
    }

    #[test]
    fn colliding_saves_open_a_conflict_session() {
        let db = Database::open_in_memory().unwrap();
        let store = SqliteRecordStore::new(db.connection());
        let cache = MemoryCache::new();
        let config = ConcurrencyConfig::default();
        let saver = AutoSaver::new(&store, &cache, &config);
        let record = store.create(fields(json!({"title": "Old", "body": "x"}))).unwrap();
        let (alice, bob) = (session("alice"), session("bob"));

        saver.begin_edit(&record.id, &alice).unwrap();
        saver.begin_edit(&record.id, &bob).unwrap();
        saver
            .save_field(&record.id, &bob, "title", json!("Server"))
            .unwrap();

        let outcome = saver
            .save_fields(
                &record.id,
                &alice,
                fields(json!({"title": "Mine", "body": "edited"})),
            )
            .unwrap();

        let SaveOutcome::Conflict {
            session,
            expected_version,
            current_version,
        } = outcome
        else {
            panic!("expected a conflict, got {outcome:?}");
        };
        assert_eq!((expected_version, current_version), (1, 2));
        assert_eq!(session.report.field_names(), vec!["title".to_string()]);
        assert_eq!(session.pending_fields, fields(json!({"body": "edited"})));

        let state = saver.current_state(&record.id, &alice).unwrap();
        assert!(state.pending_conflicts.is_some());
        assert_eq!(state.active_sessions.len(), 1);

        let outcome = saver
            .resolve_conflicts(
                &record.id,
                &alice,
                &BTreeMap::from([("title".to_string(), ResolutionChoice::KeepYours)]),
            )
            .unwrap();
        assert_eq!(outcome.new_version, 3);
        let stored = store.get(&record.id).unwrap().unwrap();
        assert_eq!(stored.fields, fields(json!({"title": "Mine", "body": "edited"})));

        let baseline = saver.baseline(&record.id, &alice).unwrap().unwrap();
        assert_eq!(baseline.version, 3);
        assert_eq!(baseline.fields, stored.fields);
        let next = saver
            .save_field(&record.id, &alice, "title", json!("Mine v2"))
            .unwrap();
        assert!(matches!(next, SaveOutcome::Saved { version: 4, .. }));
    }

    #[test]
    fn saves_are_held_while_conflicts_are_pending() {
        let db = Database::open_in_memory().unwrap();
        let store = SqliteRecordStore::new(db.connection());
        let cache = MemoryCache::new();
        let config = ConcurrencyConfig::default();
        let saver = AutoSaver::new(&store, &cache, &config);
        let record = store.create(fields(json!({"title": "Old", "body": "x"}))).unwrap();
        let (alice, bob) = (session("alice"), session("bob"));

        saver.begin_edit(&record.id, &alice).unwrap();
        saver.begin_edit(&record.id, &bob).unwrap();
        saver
            .save_field(&record.id, &bob, "title", json!("Server"))
            .unwrap();
        let first = saver
            .save_field(&record.id, &alice, "title", json!("Mine"))
            .unwrap();
        assert!(matches!(first, SaveOutcome::Conflict { .. }));

        let held = saver
            .save_field(&record.id, &alice, "body", json!("y"))
            .unwrap();
        let SaveOutcome::Held { session } = held else {
            panic!("expected the save to be held, got {held:?}");
        };
        assert_eq!(session.pending_fields, fields(json!({"body": "y"})));
        assert_eq!(store.get(&record.id).unwrap().unwrap().version, 2);
        assert_eq!(saver.baseline(&record.id, &alice).unwrap().unwrap().version, 1);

        let outcome = saver
            .resolve_conflicts(
                &record.id,
                &alice,
                &BTreeMap::from([("title".to_string(), ResolutionChoice::KeepYours)]),
            )
            .unwrap();
        assert_eq!(outcome.new_version, 3);
        assert_eq!(
            store.get(&record.id).unwrap().unwrap().fields,
            fields(json!({"title": "Mine", "body": "y"}))
        );

        let next = saver
            .save_field(&record.id, &alice, "title", json!("Mine v2"))
            .unwrap();
        assert!(matches!(next, SaveOutcome::Saved { version: 4, .. }));
    }

    #[test]
    fn auto_resolution_moves_the_baseline() {
        let db = Database::open_in_memory().unwrap();
        let store = SqliteRecordStore::new(db.connection());
        let cache = MemoryCache::new();
        let config = ConcurrencyConfig::default();
        let saver = AutoSaver::new(&store, &cache, &config);
        let record = store.create(fields(json!({"title": "Old"}))).unwrap();
        let (alice, bob) = (session("alice"), session("bob"));

        saver.begin_edit(&record.id, &alice).unwrap();
        saver.begin_edit(&record.id, &bob).unwrap();
        saver
            .save_field(&record.id, &bob, "title", json!("Server"))
            .unwrap();
        saver
            .save_field(&record.id, &alice, "title", json!("Mine"))
            .unwrap();

        let auto = saver
            .auto_resolve_conflicts(&record.id, &alice, ResolutionStrategy::LastWriteWins)
            .unwrap();
        assert!(auto.resolution.is_some());
        assert_eq!(saver.baseline(&record.id, &alice).unwrap().unwrap().version, 3);
    }

    #[test]
    fn disjoint_saves_are_reapplied_without_a_session() {
        let db = Database::open_in_memory().unwrap();
        let store = SqliteRecordStore::new(db.connection());
        let cache = MemoryCache::new();
        let config = ConcurrencyConfig::default();
        let saver = AutoSaver::new(&store, &cache, &config);
        let record = store.create(fields(json!({"title": "Old", "body": "x"}))).unwrap();
        let (alice, bob) = (session("alice"), session("bob"));

        saver.begin_edit(&record.id, &alice).unwrap();
        saver.begin_edit(&record.id, &bob).unwrap();
        saver
            .save_field(&record.id, &bob, "title", json!("Bob's title"))
            .unwrap();
        let outcome = saver
            .save_field(&record.id, &alice, "body", json!("Alice's body"))
            .unwrap();

        assert!(matches!(outcome, SaveOutcome::Saved { version: 3, .. }));
        let stored = store.get(&record.id).unwrap().unwrap();
        assert_eq!(
            stored.fields,
            fields(json!({"title": "Bob's title", "body": "Alice's body"}))
        );
        assert!(saver.resolver().pending_session(&record.id, &alice).unwrap().is_none());

        let active = saver.active_sessions(&record.id).unwrap();
        assert_eq!(active.len(), 2);
    }

    #[test]
    fn saves_require_a_baseline_and_valid_fields() {
        let db = Database::open_in_memory().unwrap();
        let store = SqliteRecordStore::new(db.connection());
        let cache = MemoryCache::new();
        let config = ConcurrencyConfig::default();
        let saver = AutoSaver::new(&store, &cache, &config);
        let record = store.create(FieldMap::new()).unwrap();
        let tab = session("tab");

        assert!(matches!(
            saver.save_field(&record.id, &tab, "title", json!("x")),
            Err(Error::InvalidInput(_))
        ));

        saver.begin_edit(&record.id, &tab).unwrap();
        assert!(matches!(
            saver.save_field(&record.id, &tab, "version", json!(9)),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            saver.save_fields(&record.id, &tab, FieldMap::new()),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            saver.begin_edit(&RecordId::new(), &tab),
            Err(Error::RecordNotFound(_))
        ));
    }

    #[test]
    fn recovery_reports_the_version_gap() {
        let db = Database::open_in_memory().unwrap();
        let store = SqliteRecordStore::new(db.connection());
        let cache = MemoryCache::new();
        let config = ConcurrencyConfig::default();
        let saver = AutoSaver::new(&store, &cache, &config);
        let record = store.create(fields(json!({"n": 0}))).unwrap();
        for n in 1..=3 {
            saver
                .coordinator()
                .update_with_version(&record.id, &fields(json!({ "n": n })), None)
                .unwrap();
        }

        let behind = saver.check_recovery(&record.id, 2).unwrap();
        assert!(behind.recovery_needed);
        assert_eq!(behind.version_gap, 2);

        let current = saver.check_recovery(&record.id, 4).unwrap();
        assert!(!current.recovery_needed);
        assert_eq!(current.version_gap, 0);
    }

    #[test]
    fn save_outcome_serializes_with_status_tag() {
        let record = VersionedRecord::new(FieldMap::new());
        let outcome = SaveOutcome::Saved {
            version: 1,
            timestamp: 0,
            fields: vec!["title".into()],
            record,
        };
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["status"], json!("saved"));
        assert_eq!(value["version"], json!(1));
    }
}
