use std::path::Path;

use concord_core::db::{RecordStore, SqliteRecordStore};

use crate::commands::common::{format_record_lines, open_database, parse_record_id, print_json};
use crate::error::CliError;

pub fn run_show(id: &str, as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let record_id = parse_record_id(id)?;

    let db = open_database(db_path)?;
    let record = SqliteRecordStore::new(db.connection())
        .get(&record_id)?
        .ok_or(concord_core::Error::RecordNotFound(record_id))?;

    if as_json {
        print_json(&record)?;
    } else {
        for line in format_record_lines(&record) {
            println!("{line}");
        }
    }
    Ok(())
}
