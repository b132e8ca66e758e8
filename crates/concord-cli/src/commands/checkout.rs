use std::path::Path;

use concord_core::cache::SqliteCache;
use concord_core::db::SqliteRecordStore;
use concord_core::{AutoSaver, ConcurrencyConfig, SessionId};

use crate::commands::common::{open_database, optional_session, parse_record_id};
use crate::error::CliError;

pub fn run_checkout(
    id: &str,
    session: Option<String>,
    db_path: &Path,
    config: &ConcurrencyConfig,
) -> Result<(), CliError> {
    let record_id = parse_record_id(id)?;
    let (session_id, generated) = match optional_session(session)? {
        Some(session_id) => (session_id, false),
        None => (SessionId::generate(), true),
    };

    let db = open_database(db_path)?;
    let store = SqliteRecordStore::new(db.connection());
    let cache = SqliteCache::new(db.connection());
    let baseline = AutoSaver::new(&store, &cache, config).begin_edit(&record_id, &session_id)?;

    println!(
        "Editing {record_id} at version {} in session {session_id}",
        baseline.version
    );
    if generated {
        println!("export CONCORD_SESSION={session_id}");
    }
    Ok(())
}
