use std::path::Path;

use concord_core::db::SqliteRecordStore;
use concord_core::{ConcurrencyConfig, UpdateCoordinator};

use crate::commands::common::{open_database, parse_record_id};
use crate::error::CliError;

pub fn run_version(
    id: &str,
    init: bool,
    db_path: &Path,
    config: &ConcurrencyConfig,
) -> Result<(), CliError> {
    let record_id = parse_record_id(id)?;

    let db = open_database(db_path)?;
    let store = SqliteRecordStore::new(db.connection());
    let coordinator = UpdateCoordinator::new(&store, config.retry);

    if init && coordinator.initialize_versioning(&record_id)? {
        eprintln!("Initialized versioning for {record_id}");
    }
    println!("{}", coordinator.get_current_version(&record_id)?);
    Ok(())
}
