use std::path::Path;

use concord_core::autosave::CurrentState;
use concord_core::cache::SqliteCache;
use concord_core::db::SqliteRecordStore;
use concord_core::util::format_timestamp;
use concord_core::{AutoSaver, ConcurrencyConfig};

use crate::commands::common::{
    format_field_lines, open_database, parse_record_id, print_json, require_session,
};
use crate::error::CliError;

pub fn run_state(
    id: &str,
    session: Option<String>,
    as_json: bool,
    db_path: &Path,
    config: &ConcurrencyConfig,
) -> Result<(), CliError> {
    let record_id = parse_record_id(id)?;
    let session_id = require_session(session)?;

    let db = open_database(db_path)?;
    let store = SqliteRecordStore::new(db.connection());
    let cache = SqliteCache::new(db.connection());
    let state = AutoSaver::new(&store, &cache, config).current_state(&record_id, &session_id)?;

    if as_json {
        print_json(&state)?;
    } else {
        for line in format_state_lines(&state) {
            println!("{line}");
        }
    }
    Ok(())
}

pub fn format_state_lines(state: &CurrentState) -> Vec<String> {
    let mut lines = vec![
        format!("id:       {}", state.record_id),
        format!("version:  {}", state.version),
        format!("updated:  {}", format_timestamp(state.last_modified)),
        "fields:".to_string(),
    ];
    lines.extend(format_field_lines(&state.fields));

    match &state.pending_conflicts {
        Some(session) => lines.push(format!(
            "pending conflicts: {}",
            session.report.field_names().join(", ")
        )),
        None => lines.push("pending conflicts: none".to_string()),
    }

    lines.push(format!("active sessions: {}", state.active_sessions.len()));
    lines.extend(state.active_sessions.iter().map(|entry| {
        format!(
            "  {} at {} ({})",
            entry.session_id,
            format_timestamp(entry.last_activity),
            entry.active_fields.join(", ")
        )
    }));
    lines
}
