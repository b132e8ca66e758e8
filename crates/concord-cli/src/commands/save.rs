use std::path::Path;

use concord_core::cache::SqliteCache;
use concord_core::db::SqliteRecordStore;
use concord_core::models::ConflictSession;
use concord_core::{AutoSaver, ConcurrencyConfig, SaveOutcome};

use crate::commands::common::{
    open_database, parse_field_changes, parse_record_id, print_json, require_session,
};
use crate::error::CliError;

pub fn run_save(
    id: &str,
    set: &[String],
    set_json: &[String],
    session: Option<String>,
    as_json: bool,
    db_path: &Path,
    config: &ConcurrencyConfig,
) -> Result<(), CliError> {
    let record_id = parse_record_id(id)?;
    let session_id = require_session(session)?;
    let changes = parse_field_changes(set, set_json)?;
    if changes.is_empty() {
        return Err(CliError::NoChanges);
    }

    let db = open_database(db_path)?;
    let store = SqliteRecordStore::new(db.connection());
    let cache = SqliteCache::new(db.connection());
    let outcome = AutoSaver::new(&store, &cache, config).save_fields(&record_id, &session_id, changes)?;

    if as_json {
        print_json(&outcome)?;
    } else {
        for line in format_save_lines(&outcome) {
            println!("{line}");
        }
    }

    match outcome {
        SaveOutcome::Saved { .. } => Ok(()),
        SaveOutcome::Conflict { session, .. } | SaveOutcome::Held { session } => {
            Err(CliError::ConflictsPending(session.report.total_conflicts))
        }
    }
}

pub fn format_save_lines(outcome: &SaveOutcome) -> Vec<String> {
    match outcome {
        SaveOutcome::Saved {
            version, fields, ..
        } if fields.is_empty() => vec![format!("Nothing changed, version {version}")],
        SaveOutcome::Saved {
            version, fields, ..
        } => vec![format!("Saved {} at version {version}", fields.join(", "))],
        SaveOutcome::Conflict {
            session,
            expected_version,
            current_version,
        } => {
            let mut lines = vec![format!(
                "Record moved from version {expected_version} to {current_version} while you were editing"
            )];
            lines.extend(
                session
                    .report
                    .conflicts
                    .iter()
                    .map(|conflict| format!("  {} ({})", conflict.field, conflict.conflict_type)),
            );
            if !session.pending_fields.is_empty() {
                lines.push(format!("Held until resolved: {}", held_fields(session)));
            }
            lines
        }
        SaveOutcome::Held { session } => vec![
            format!(
                "{} conflict(s) still pending, nothing was written",
                session.report.total_conflicts
            ),
            format!("Held until resolved: {}", held_fields(session)),
        ],
    }
}

fn held_fields(session: &ConflictSession) -> String {
    session
        .pending_fields
        .keys()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}
