use std::path::Path;

use concord_core::autosave::RecoveryStatus;
use concord_core::cache::SqliteCache;
use concord_core::db::SqliteRecordStore;
use concord_core::{AutoSaver, ConcurrencyConfig};

use crate::commands::common::{open_database, parse_record_id, print_json};
use crate::error::CliError;

pub fn run_recover(
    id: &str,
    client_version: i64,
    as_json: bool,
    db_path: &Path,
    config: &ConcurrencyConfig,
) -> Result<(), CliError> {
    let record_id = parse_record_id(id)?;

    let db = open_database(db_path)?;
    let store = SqliteRecordStore::new(db.connection());
    let cache = SqliteCache::new(db.connection());
    let status = AutoSaver::new(&store, &cache, config).check_recovery(&record_id, client_version)?;

    if as_json {
        print_json(&status)?;
    } else {
        println!("{}", format_recovery(&status));
    }
    Ok(())
}

pub fn format_recovery(status: &RecoveryStatus) -> String {
    if status.recovery_needed {
        format!(
            "Behind by {} version(s): client has {}, record is at {}. Check out again before saving.",
            status.version_gap, status.client_version, status.current_version
        )
    } else {
        format!("Up to date at version {}", status.current_version)
    }
}
