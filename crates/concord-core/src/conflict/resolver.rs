//! Conflict session lifecycle: present, resolve, auto-resolve, history.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use super::detection::classify;
use super::merge::{apply_choice, strategy_choice};
use super::presentation::{field_label, present_session, ConflictPresentation};
use super::sessions::SessionStore;
use crate::cache::Cache;
use crate::config::ConcurrencyConfig;
use crate::coordinator::UpdateCoordinator;
use crate::db::RecordStore;
use crate::error::{Error, Result};
use crate::models::{
    ConflictReport, ConflictSession, FieldMap, HistoryEntry, RecordId, ResolutionChoice,
    ResolutionStrategy, SessionId, VersionedRecord,
};
use crate::util::now_millis;

/// Result of applying resolution choices
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolutionOutcome {
    /// Values written for the resolved conflicts
    pub resolved_fields: FieldMap,
    pub new_version: i64,
    /// Write timestamp (Unix ms)
    pub timestamp: i64,
    /// Conflicts still waiting for a choice
    pub remaining_fields: Vec<String>,
    /// Whether the session is now fully resolved
    pub session_resolved: bool,
    /// The record as stored after the resolution write
    pub record: VersionedRecord,
}

/// Result of resolving a session with a strategy
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AutoResolution {
    pub strategy: ResolutionStrategy,
    pub auto_resolved_count: usize,
    pub manual_resolution_required: usize,
    pub manual_fields: Vec<String>,
    /// Present when at least one field was resolved automatically
    pub resolution: Option<ResolutionOutcome>,
}

pub struct ConflictResolver<'a, S, C: ?Sized> {
    coordinator: UpdateCoordinator<'a, S>,
    sessions: SessionStore<'a, C>,
    labels: HashMap<String, String>,
    preview_chars: usize,
}

impl<'a, S: RecordStore, C: Cache + ?Sized> ConflictResolver<'a, S, C> {
    pub fn new(store: &'a S, cache: &'a C, config: &ConcurrencyConfig) -> Self {
        Self {
            coordinator: UpdateCoordinator::new(store, config.retry),
            sessions: SessionStore::new(
                cache,
                config.session_ttl,
                config.history_ttl,
                config.history_limit,
            ),
            labels: HashMap::new(),
            preview_chars: config.preview_chars,
        }
    }

    /// Use `label` instead of the derived label for `field`
    #[must_use]
    pub fn with_label(mut self, field: impl Into<String>, label: impl Into<String>) -> Self {
        self.labels.insert(field.into(), label.into());
        self
    }

    pub fn label_for(&self, field: &str) -> String {
        self.labels
            .get(field)
            .cloned()
            .unwrap_or_else(|| field_label(field))
    }

    /// Persist a detected conflict report as a resolvable session
    pub fn open_session(
        &self,
        record_id: &RecordId,
        session_id: &SessionId,
        report: ConflictReport,
        pending_fields: FieldMap,
    ) -> Result<ConflictSession> {
        if !report.has_conflicts {
            return Err(Error::InvalidInput(
                "cannot open a conflict session without conflicts".to_string(),
            ));
        }

        let session = ConflictSession::new(*record_id, session_id.clone(), report, pending_fields);
        self.sessions.save(&session)?;

        tracing::info!(
            record_id = %record_id,
            session_id = %session_id,
            conflicts = session.report.total_conflicts,
            model_version = session.report.model_version,
            "Opened conflict session"
        );
        Ok(session)
    }

    /// The session, if it still has unresolved conflicts
    pub fn pending_session(
        &self,
        record_id: &RecordId,
        session_id: &SessionId,
    ) -> Result<Option<ConflictSession>> {
        Ok(self
            .sessions
            .load(record_id, session_id)?
            .filter(ConflictSession::is_pending))
    }

    /// Fold later edits into a pending session instead of writing them.
    ///
    /// Edits of a conflicting field replace the incoming value of that
    /// conflict; other fields join the held pending fields. Returns `None`
    /// when the session has nothing pending.
    pub fn hold_changes(
        &self,
        record_id: &RecordId,
        session_id: &SessionId,
        changes: &FieldMap,
    ) -> Result<Option<ConflictSession>> {
        let Some(mut session) = self.pending_session(record_id, session_id)? else {
            return Ok(None);
        };

        for (field, value) in changes {
            match session
                .report
                .conflicts
                .iter_mut()
                .find(|conflict| &conflict.field == field)
            {
                Some(conflict) => {
                    conflict.conflict_type =
                        classify(&conflict.original_value, &conflict.current_value, value);
                    conflict.incoming_value = value.clone();
                }
                None => {
                    session.pending_fields.insert(field.clone(), value.clone());
                }
            }
        }
        self.sessions.save(&session)?;

        tracing::info!(
            record_id = %record_id,
            session_id = %session_id,
            fields = ?changes.keys().collect::<Vec<_>>(),
            "Held changes until conflicts are resolved"
        );
        Ok(Some(session))
    }

    pub fn present_conflicts_for_resolution(
        &self,
        record_id: &RecordId,
        session_id: &SessionId,
    ) -> Result<ConflictPresentation> {
        let Some(session) = self.pending_session(record_id, session_id)? else {
            return Ok(ConflictPresentation::empty());
        };
        Ok(present_session(
            &session,
            |field| self.label_for(field),
            self.preview_chars,
        ))
    }

    /// Apply one choice per field and write them with a single update.
    ///
    /// Fields missing from `resolutions` stay pending in the session; unknown
    /// fields are ignored. The write expects the version the session
    /// recorded, so a racing writer surfaces as a concurrency conflict.
    pub fn resolve_conflicts(
        &self,
        record_id: &RecordId,
        session_id: &SessionId,
        resolutions: &BTreeMap<String, ResolutionChoice>,
    ) -> Result<ResolutionOutcome> {
        let Some(mut session) = self.pending_session(record_id, session_id)? else {
            return Err(Error::NoPendingConflicts {
                record_id: *record_id,
                session_id: session_id.clone(),
            });
        };

        let mut resolved = FieldMap::new();
        let mut remaining = Vec::new();
        for conflict in &session.report.conflicts {
            match resolutions.get(&conflict.field) {
                Some(choice) => {
                    resolved.insert(conflict.field.clone(), apply_choice(conflict, *choice));
                }
                None => remaining.push(conflict.clone()),
            }
        }

        if resolved.is_empty() {
            return Err(Error::InvalidInput(
                "no resolution matches a pending conflict".to_string(),
            ));
        }

        let mut changes = session.pending_fields.clone();
        changes.extend(resolved.clone());

        let outcome = match self.coordinator.update_with_version(
            record_id,
            &changes,
            Some(session.report.model_version),
        ) {
            Ok(outcome) => outcome,
            Err(error) => {
                tracing::error!(
                    record_id = %record_id,
                    session_id = %session_id,
                    error = %error,
                    "Conflict resolution failed"
                );
                self.record_history(
                    record_id,
                    HistoryEntry {
                        session_id: session_id.clone(),
                        timestamp: now_millis(),
                        conflict_count: session.report.total_conflicts,
                        resolved: false,
                    },
                );
                return Err(error);
            }
        };

        session.pending_fields.clear();
        session.resolved_fields.extend(resolved.keys().cloned());
        let remaining_fields: Vec<String> =
            remaining.iter().map(|conflict| conflict.field.clone()).collect();

        // The record write is committed; cache failures from here on are
        // logged and the outcome is still returned
        if remaining.is_empty() {
            session.resolved = true;
            session.resolved_at = Some(outcome.timestamp);
            self.save_session(&session);
            self.record_history(
                record_id,
                HistoryEntry {
                    session_id: session_id.clone(),
                    timestamp: outcome.timestamp,
                    conflict_count: session.resolved_fields.len(),
                    resolved: true,
                },
            );
            tracing::info!(
                record_id = %record_id,
                session_id = %session_id,
                fields = ?resolved.keys().collect::<Vec<_>>(),
                new_version = outcome.new_version,
                "Conflicts resolved"
            );
        } else {
            // Later choices must expect the version we just wrote
            session.report =
                ConflictReport::new(remaining, outcome.new_version, outcome.record.updated_at);
            self.save_session(&session);
            tracing::info!(
                record_id = %record_id,
                session_id = %session_id,
                remaining = ?remaining_fields,
                new_version = outcome.new_version,
                "Conflicts partially resolved"
            );
        }

        Ok(ResolutionOutcome {
            resolved_fields: resolved,
            new_version: outcome.new_version,
            timestamp: outcome.timestamp,
            session_resolved: remaining_fields.is_empty(),
            remaining_fields,
            record: outcome.record,
        })
    }

    fn save_session(&self, session: &ConflictSession) {
        if let Err(error) = self.sessions.save(session) {
            tracing::warn!(
                record_id = %session.record_id,
                session_id = %session.session_id,
                error = %error,
                "Could not store conflict session"
            );
        }
    }

    fn record_history(&self, record_id: &RecordId, entry: HistoryEntry) {
        if let Err(error) = self.sessions.append_history(record_id, entry) {
            tracing::warn!(record_id = %record_id, error = %error, "Could not record conflict history");
        }
    }

    /// Resolve what `strategy` can decide on its own and report the rest
    pub fn auto_resolve_conflicts(
        &self,
        record_id: &RecordId,
        session_id: &SessionId,
        strategy: ResolutionStrategy,
    ) -> Result<AutoResolution> {
        let Some(session) = self.pending_session(record_id, session_id)? else {
            return Err(Error::NoPendingConflicts {
                record_id: *record_id,
                session_id: session_id.clone(),
            });
        };

        let mut choices = BTreeMap::new();
        let mut manual_fields = Vec::new();
        for conflict in &session.report.conflicts {
            match strategy_choice(strategy, conflict) {
                Some(choice) => {
                    choices.insert(conflict.field.clone(), choice);
                }
                None => manual_fields.push(conflict.field.clone()),
            }
        }

        let resolution = if choices.is_empty() {
            None
        } else {
            Some(self.resolve_conflicts(record_id, session_id, &choices)?)
        };

        tracing::info!(
            record_id = %record_id,
            session_id = %session_id,
            strategy = %strategy,
            auto_resolved = choices.len(),
            manual = manual_fields.len(),
            "Auto-resolved conflicts"
        );

        Ok(AutoResolution {
            strategy,
            auto_resolved_count: choices.len(),
            manual_resolution_required: manual_fields.len(),
            manual_fields,
            resolution,
        })
    }

    /// The most recent `limit` history entries, oldest first
    pub fn get_conflict_history(
        &self,
        record_id: &RecordId,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>> {
        let mut entries = self.sessions.history(record_id)?;
        let keep_from = entries.len().saturating_sub(limit);
        Ok(entries.split_off(keep_from))
    }

    /// Drop a session, resolved or not. Returns whether one existed.
    pub fn clear_resolved_conflicts(
        &self,
        record_id: &RecordId,
        session_id: &SessionId,
    ) -> Result<bool> {
        let removed = self.sessions.forget(record_id, session_id)?;
        if removed {
            tracing::info!(
                record_id = %record_id,
                session_id = %session_id,
                "Cleared conflict session"
            );
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};

    use super::*;
    use crate::cache::MemoryCache;
    use crate::conflict::detection::ConflictDetector;
    use crate::coordinator::tests::fields;
    use crate::db::{Database, SqliteRecordStore};
    use crate::models::{ConflictType, RecordHandle};

    fn config() -> ConcurrencyConfig {
        ConcurrencyConfig {
            retry: crate::config::RetryPolicy {
                max_attempts: 3,
                backoff_step: Duration::from_millis(1),
            },
            ..ConcurrencyConfig::default()
        }
    }

    fn tab() -> SessionId {
        SessionId::parse("tab-1").unwrap()
    }

    /// Client edits from `baseline`, the server moves to `server`, then the
    /// client submits `incoming`. Returns the record id after opening a session.
    fn conflicted(
        store: &SqliteRecordStore<'_>,
        resolver: &ConflictResolver<'_, SqliteRecordStore<'_>, MemoryCache>,
        baseline: Value,
        server: Value,
        incoming: Value,
    ) -> RecordId {
        let record = store.create(fields(baseline)).unwrap();
        let handle = RecordHandle::from_record(&record);
        let coordinator = UpdateCoordinator::new(store, config().retry);
        coordinator
            .update_with_version(&record.id, &fields(server), Some(1))
            .unwrap();

        let incoming = fields(incoming);
        let err = coordinator
            .update_with_version(&record.id, &incoming, Some(1))
            .unwrap_err();
        assert!(matches!(err, Error::ConcurrencyConflict(_)));

        let report = ConflictDetector::new(store)
            .detect_conflicts(&handle, &incoming)
            .unwrap();
        resolver
            .open_session(&record.id, &tab(), report, FieldMap::new())
            .unwrap();
        record.id
    }

    #[test]
    fn keep_yours_writes_against_the_detected_version() {
        let db = Database::open_in_memory().unwrap();
        let store = SqliteRecordStore::new(db.connection());
        let cache = MemoryCache::new();
        let config = config();
        let resolver = ConflictResolver::new(&store, &cache, &config);
        let id = conflicted(
            &store,
            &resolver,
            json!({"title": "Old"}),
            json!({"title": "Server"}),
            json!({"title": "Mine"}),
        );

        let session = resolver.pending_session(&id, &tab()).unwrap().unwrap();
        assert_eq!(session.report.model_version, 2);
        assert_eq!(
            session.report.conflicts[0].conflict_type,
            ConflictType::TextReduction
        );

        let outcome = resolver
            .resolve_conflicts(
                &id,
                &tab(),
                &BTreeMap::from([("title".to_string(), ResolutionChoice::KeepYours)]),
            )
            .unwrap();

        assert_eq!(outcome.new_version, 3);
        assert!(outcome.session_resolved);
        assert_eq!(outcome.resolved_fields.get("title"), Some(&json!("Mine")));
        let stored = store.get(&id).unwrap().unwrap();
        assert_eq!(stored.field("title"), &json!("Mine"));
        assert_eq!(stored.version, 3);

        // The resolved session is kept for the UI but no longer pending
        assert!(resolver.pending_session(&id, &tab()).unwrap().is_none());
        let history = resolver.get_conflict_history(&id, 10).unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].resolved);
        assert_eq!(history[0].conflict_count, 1);
    }

    #[test]
    fn resolving_twice_reports_no_pending_conflicts() {
        let db = Database::open_in_memory().unwrap();
        let store = SqliteRecordStore::new(db.connection());
        let cache = MemoryCache::new();
        let config = config();
        let resolver = ConflictResolver::new(&store, &cache, &config);
        let id = conflicted(
            &store,
            &resolver,
            json!({"title": "Old"}),
            json!({"title": "Server"}),
            json!({"title": "Mine"}),
        );
        let choices = BTreeMap::from([("title".to_string(), ResolutionChoice::KeepServer)]);

        resolver.resolve_conflicts(&id, &tab(), &choices).unwrap();
        let err = resolver.resolve_conflicts(&id, &tab(), &choices).unwrap_err();
        assert!(matches!(err, Error::NoPendingConflicts { .. }));

        let other = SessionId::parse("tab-2").unwrap();
        assert!(matches!(
            resolver.resolve_conflicts(&id, &other, &choices),
            Err(Error::NoPendingConflicts { .. })
        ));
        assert_eq!(store.get(&id).unwrap().unwrap().field("title"), &json!("Server"));
    }

    #[test]
    fn merge_combines_edits_of_an_empty_field() {
        let db = Database::open_in_memory().unwrap();
        let store = SqliteRecordStore::new(db.connection());
        let cache = MemoryCache::new();
        let config = config();
        let resolver = ConflictResolver::new(&store, &cache, &config);
        let id = conflicted(
            &store,
            &resolver,
            json!({"body": ""}),
            json!({"body": "Hello"}),
            json!({"body": "World"}),
        );

        resolver
            .resolve_conflicts(
                &id,
                &tab(),
                &BTreeMap::from([("body".to_string(), ResolutionChoice::Merge)]),
            )
            .unwrap();

        assert_eq!(
            store.get(&id).unwrap().unwrap().field("body"),
            &json!("Hello\n\nWorld")
        );
    }

    #[test]
    fn smart_merge_leaves_divergent_fields_for_the_user() {
        let db = Database::open_in_memory().unwrap();
        let store = SqliteRecordStore::new(db.connection());
        let cache = MemoryCache::new();
        let config = config();
        let resolver = ConflictResolver::new(&store, &cache, &config);
        let id = conflicted(
            &store,
            &resolver,
            json!({"title": "Old", "body": "Hi"}),
            json!({"title": "Server", "body": "Hi there"}),
            json!({"title": "Mine", "body": "Hi there friend"}),
        );

        let auto = resolver
            .auto_resolve_conflicts(&id, &tab(), ResolutionStrategy::SmartMerge)
            .unwrap();
        assert_eq!(auto.auto_resolved_count, 1);
        assert_eq!(auto.manual_resolution_required, 1);
        assert_eq!(auto.manual_fields, vec!["title".to_string()]);
        let partial = auto.resolution.unwrap();
        assert!(!partial.session_resolved);
        assert_eq!(partial.new_version, 3);

        let stored = store.get(&id).unwrap().unwrap();
        assert_eq!(stored.field("body"), &json!("Hi there friend"));
        assert_eq!(stored.field("title"), &json!("Server"));

        // The remaining conflict now expects the version written above
        let presentation = resolver
            .present_conflicts_for_resolution(&id, &tab())
            .unwrap();
        assert_eq!(presentation.conflict_count, 1);
        assert_eq!(presentation.model_version, Some(3));
        assert_eq!(presentation.fields[0].field, "title");

        let outcome = resolver
            .resolve_conflicts(
                &id,
                &tab(),
                &BTreeMap::from([("title".to_string(), ResolutionChoice::KeepYours)]),
            )
            .unwrap();
        assert!(outcome.session_resolved);
        assert_eq!(outcome.new_version, 4);

        let history = resolver.get_conflict_history(&id, 10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].conflict_count, 2);
    }

    #[test]
    fn strategies_resolve_every_field() {
        for (strategy, expected) in [
            (ResolutionStrategy::LastWriteWins, "Mine"),
            (ResolutionStrategy::FirstWriteWins, "Server"),
        ] {
            let db = Database::open_in_memory().unwrap();
            let store = SqliteRecordStore::new(db.connection());
            let cache = MemoryCache::new();
            let config = config();
            let resolver = ConflictResolver::new(&store, &cache, &config);
            let id = conflicted(
                &store,
                &resolver,
                json!({"title": "Old"}),
                json!({"title": "Server"}),
                json!({"title": "Mine"}),
            );

            let auto = resolver.auto_resolve_conflicts(&id, &tab(), strategy).unwrap();
            assert_eq!(auto.auto_resolved_count, 1);
            assert!(auto.manual_fields.is_empty());
            assert!(auto.resolution.unwrap().session_resolved);
            assert_eq!(
                store.get(&id).unwrap().unwrap().field("title"),
                &json!(expected)
            );
        }
    }

    #[test]
    fn smart_merge_without_mergeable_fields_writes_nothing() {
        let db = Database::open_in_memory().unwrap();
        let store = SqliteRecordStore::new(db.connection());
        let cache = MemoryCache::new();
        let config = config();
        let resolver = ConflictResolver::new(&store, &cache, &config);
        let id = conflicted(
            &store,
            &resolver,
            json!({"title": "Old"}),
            json!({"title": "Server"}),
            json!({"title": "Mine"}),
        );

        let auto = resolver
            .auto_resolve_conflicts(&id, &tab(), ResolutionStrategy::SmartMerge)
            .unwrap();
        assert_eq!(auto.auto_resolved_count, 0);
        assert!(auto.resolution.is_none());
        assert_eq!(store.get(&id).unwrap().unwrap().version, 2);
        assert!(resolver.pending_session(&id, &tab()).unwrap().is_some());
    }

    #[test]
    fn racing_resolution_surfaces_conflict_and_keeps_session() {
        let db = Database::open_in_memory().unwrap();
        let store = SqliteRecordStore::new(db.connection());
        let cache = MemoryCache::new();
        let config = config();
        let resolver = ConflictResolver::new(&store, &cache, &config);
        let id = conflicted(
            &store,
            &resolver,
            json!({"title": "Old"}),
            json!({"title": "Server"}),
            json!({"title": "Mine"}),
        );
        UpdateCoordinator::new(&store, config.retry)
            .update_with_version(&id, &fields(json!({"title": "Third"})), None)
            .unwrap();

        let err = resolver
            .resolve_conflicts(
                &id,
                &tab(),
                &BTreeMap::from([("title".to_string(), ResolutionChoice::KeepYours)]),
            )
            .unwrap_err();

        let Error::ConcurrencyConflict(details) = err else {
            panic!("expected a concurrency conflict, got {err:?}");
        };
        assert_eq!(details.expected_version, 2);
        assert_eq!(details.actual_version, Some(3));
        assert!(resolver.pending_session(&id, &tab()).unwrap().is_some());
        let history = resolver.get_conflict_history(&id, 10).unwrap();
        assert_eq!(history.len(), 1);
        assert!(!history[0].resolved);
    }

    #[test]
    fn pending_fields_are_written_with_the_resolution() {
        let db = Database::open_in_memory().unwrap();
        let store = SqliteRecordStore::new(db.connection());
        let cache = MemoryCache::new();
        let config = config();
        let resolver = ConflictResolver::new(&store, &cache, &config);
        let record = store.create(fields(json!({"title": "Old", "body": "x"}))).unwrap();
        let report = ConflictReport::new(
            vec![crate::models::FieldConflict {
                field: "title".into(),
                original_value: json!("Old"),
                current_value: json!("Old"),
                incoming_value: json!("Mine"),
                conflict_type: ConflictType::TextModification,
            }],
            1,
            record.updated_at,
        );
        resolver
            .open_session(&record.id, &tab(), report, fields(json!({"body": "edited"})))
            .unwrap();

        let outcome = resolver
            .resolve_conflicts(
                &record.id,
                &tab(),
                &BTreeMap::from([
                    ("title".to_string(), ResolutionChoice::KeepYours),
                    ("unknown".to_string(), ResolutionChoice::KeepServer),
                ]),
            )
            .unwrap();

        assert_eq!(outcome.resolved_fields.len(), 1);
        let stored = store.get(&record.id).unwrap().unwrap();
        assert_eq!(stored.field("title"), &json!("Mine"));
        assert_eq!(stored.field("body"), &json!("edited"));
    }

    #[test]
    fn choices_for_unknown_fields_only_are_rejected() {
        let db = Database::open_in_memory().unwrap();
        let store = SqliteRecordStore::new(db.connection());
        let cache = MemoryCache::new();
        let config = config();
        let resolver = ConflictResolver::new(&store, &cache, &config);
        let id = conflicted(
            &store,
            &resolver,
            json!({"title": "Old"}),
            json!({"title": "Server"}),
            json!({"title": "Mine"}),
        );

        let err = resolver
            .resolve_conflicts(
                &id,
                &tab(),
                &BTreeMap::from([("color".to_string(), ResolutionChoice::KeepYours)]),
            )
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert_eq!(store.get(&id).unwrap().unwrap().version, 2);
    }

    #[test]
    fn history_is_bounded_with_most_recent_last() {
        let db = Database::open_in_memory().unwrap();
        let store = SqliteRecordStore::new(db.connection());
        let cache = MemoryCache::new();
        let config = config();
        let resolver = ConflictResolver::new(&store, &cache, &config);
        let coordinator = UpdateCoordinator::new(&store, config.retry);
        let record = store.create(fields(json!({"n": 0}))).unwrap();

        for round in 1..=55_i64 {
            let version = coordinator.get_current_version(&record.id).unwrap();
            let baseline = store.get(&record.id).unwrap().unwrap();
            coordinator
                .update_with_version(&record.id, &fields(json!({"n": round * 10})), None)
                .unwrap();
            let incoming = fields(json!({"n": round * 10 + 1}));
            assert!(coordinator
                .update_with_version(&record.id, &incoming, Some(version))
                .is_err());
            let report = ConflictDetector::new(&store)
                .detect_conflicts(&RecordHandle::from_record(&baseline), &incoming)
                .unwrap();
            let session = SessionId::parse(&format!("tab-{round}")).unwrap();
            resolver
                .open_session(&record.id, &session, report, FieldMap::new())
                .unwrap();
            resolver
                .auto_resolve_conflicts(&record.id, &session, ResolutionStrategy::LastWriteWins)
                .unwrap();
        }

        let history = resolver.get_conflict_history(&record.id, 50).unwrap();
        assert_eq!(history.len(), 50);
        assert_eq!(history[0].session_id.as_str(), "tab-6");
        assert_eq!(history[49].session_id.as_str(), "tab-55");
        assert_eq!(resolver.get_conflict_history(&record.id, 5).unwrap().len(), 5);
    }

    #[test]
    fn presentation_and_clearing() {
        let db = Database::open_in_memory().unwrap();
        let store = SqliteRecordStore::new(db.connection());
        let cache = MemoryCache::new();
        let config = config();
        let resolver = ConflictResolver::new(&store, &cache, &config)
            .with_label("how_to_article", "How-to Article");
        let id = conflicted(
            &store,
            &resolver,
            json!({"how_to_article": "Old"}),
            json!({"how_to_article": "Server"}),
            json!({"how_to_article": "Mine"}),
        );

        let presentation = resolver
            .present_conflicts_for_resolution(&id, &tab())
            .unwrap();
        assert!(presentation.has_conflicts);
        assert_eq!(presentation.fields[0].label, "How-to Article");
        assert_eq!(presentation.fields[0].your_version.value, json!("Mine"));
        assert_eq!(presentation.fields[0].server_version.value, json!("Server"));

        assert!(resolver.clear_resolved_conflicts(&id, &tab()).unwrap());
        assert!(!resolver.clear_resolved_conflicts(&id, &tab()).unwrap());
        let empty = resolver
            .present_conflicts_for_resolution(&id, &tab())
            .unwrap();
        assert_eq!(empty, ConflictPresentation::empty());
    }

    #[test]
    fn open_session_requires_conflicts() {
        let db = Database::open_in_memory().unwrap();
        let store = SqliteRecordStore::new(db.connection());
        let cache = MemoryCache::new();
        let config = config();
        let resolver = ConflictResolver::new(&store, &cache, &config);

        let err = resolver
            .open_session(
                &RecordId::new(),
                &tab(),
                ConflictReport::new(Vec::new(), 1, 0),
                FieldMap::new(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(cache.is_empty());
    }

    /// Cache whose writes can be switched off after setup
    struct FlakyCache {
        inner: MemoryCache,
        fail_puts: parking_lot::Mutex<bool>,
    }

    impl Cache for FlakyCache {
        fn get(&self, key: &str) -> Result<Option<String>> {
            self.inner.get(key)
        }

        fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
            if *self.fail_puts.lock() {
                return Err(Error::Store(crate::error::StoreError::Transient(
                    "cache unavailable".into(),
                )));
            }
            self.inner.put(key, value, ttl)
        }

        fn forget(&self, key: &str) -> Result<bool> {
            self.inner.forget(key)
        }
    }

    #[test]
    fn committed_resolution_survives_cache_failures() {
        let db = Database::open_in_memory().unwrap();
        let store = SqliteRecordStore::new(db.connection());
        let cache = FlakyCache {
            inner: MemoryCache::new(),
            fail_puts: parking_lot::Mutex::new(false),
        };
        let config = config();
        let resolver = ConflictResolver::new(&store, &cache, &config);
        let record = store.create(fields(json!({"title": "Old"}))).unwrap();
        let handle = RecordHandle::from_record(&record);
        UpdateCoordinator::new(&store, config.retry)
            .update_with_version(&record.id, &fields(json!({"title": "Server"})), None)
            .unwrap();
        let report = ConflictDetector::new(&store)
            .detect_conflicts(&handle, &fields(json!({"title": "Mine"})))
            .unwrap();
        resolver
            .open_session(&record.id, &tab(), report, FieldMap::new())
            .unwrap();

        *cache.fail_puts.lock() = true;
        let outcome = resolver
            .resolve_conflicts(
                &record.id,
                &tab(),
                &BTreeMap::from([("title".to_string(), ResolutionChoice::KeepYours)]),
            )
            .unwrap();

        assert_eq!(outcome.new_version, 3);
        assert_eq!(outcome.record.field("title"), &json!("Mine"));
        assert_eq!(store.get(&record.id).unwrap().unwrap().version, 3);
    }

    #[test]
    fn retried_session_leaves_a_single_history_entry() {
        let db = Database::open_in_memory().unwrap();
        let store = SqliteRecordStore::new(db.connection());
        let cache = MemoryCache::new();
        let config = config();
        let resolver = ConflictResolver::new(&store, &cache, &config);
        let coordinator = UpdateCoordinator::new(&store, config.retry);
        let id = conflicted(
            &store,
            &resolver,
            json!({"title": "Old"}),
            json!({"title": "Server"}),
            json!({"title": "Mine"}),
        );
        let choices = BTreeMap::from([("title".to_string(), ResolutionChoice::KeepYours)]);

        coordinator
            .update_with_version(&id, &fields(json!({"title": "Third"})), None)
            .unwrap();
        assert!(resolver.resolve_conflicts(&id, &tab(), &choices).is_err());
        assert!(resolver.resolve_conflicts(&id, &tab(), &choices).is_err());

        // The client re-detects against the latest version and tries again
        let handle = RecordHandle::new(id, fields(json!({"title": "Old"})));
        let report = ConflictDetector::new(&store)
            .detect_conflicts(&handle, &fields(json!({"title": "Mine"})))
            .unwrap();
        resolver
            .open_session(&id, &tab(), report, FieldMap::new())
            .unwrap();
        resolver.resolve_conflicts(&id, &tab(), &choices).unwrap();

        let history = resolver.get_conflict_history(&id, 10).unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].resolved);
    }

    #[test]
    fn held_changes_join_the_pending_session() {
        let db = Database::open_in_memory().unwrap();
        let store = SqliteRecordStore::new(db.connection());
        let cache = MemoryCache::new();
        let config = config();
        let resolver = ConflictResolver::new(&store, &cache, &config);
        let id = conflicted(
            &store,
            &resolver,
            json!({"title": "Old", "body": "x"}),
            json!({"title": "Server"}),
            json!({"title": "Mine"}),
        );

        let session = resolver
            .hold_changes(&id, &tab(), &fields(json!({"title": "Mine, longer", "body": "y"})))
            .unwrap()
            .unwrap();
        assert_eq!(session.pending_fields, fields(json!({"body": "y"})));
        let title = session.report.conflict("title").unwrap();
        assert_eq!(title.incoming_value, json!("Mine, longer"));
        assert_eq!(title.conflict_type, ConflictType::TextExpansion);
        assert_eq!(store.get(&id).unwrap().unwrap().version, 2);

        let other = SessionId::parse("tab-2").unwrap();
        assert!(resolver
            .hold_changes(&id, &other, &fields(json!({"body": "z"})))
            .unwrap()
            .is_none());

        resolver
            .resolve_conflicts(
                &id,
                &tab(),
                &BTreeMap::from([("title".to_string(), ResolutionChoice::KeepYours)]),
            )
            .unwrap();
        let stored = store.get(&id).unwrap().unwrap();
        assert_eq!(stored.fields, fields(json!({"title": "Mine, longer", "body": "y"})));
    }
}
