use std::path::Path;

use concord_core::db::SqliteRecordStore;

use crate::commands::common::{open_database, parse_field_changes, print_json};
use crate::error::CliError;

pub fn run_create(
    set: &[String],
    set_json: &[String],
    as_json: bool,
    db_path: &Path,
) -> Result<(), CliError> {
    let fields = parse_field_changes(set, set_json)?;

    let db = open_database(db_path)?;
    let record = SqliteRecordStore::new(db.connection()).create(fields)?;

    if as_json {
        print_json(&record)?;
    } else {
        println!("{}", record.id);
    }
    Ok(())
}
