use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};

use concord_core::db::Database;
use concord_core::models::ResolutionChoice;
use concord_core::util::format_timestamp;
use concord_core::{FieldMap, RecordId, SessionId, VersionedRecord};
use serde::Serialize;
use serde_json::Value;

use crate::error::CliError;

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("CONCORD_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(env::temp_dir)
        .join("concord")
        .join("concord.db")
}

pub fn open_database(path: &Path) -> Result<Database, CliError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(Database::open(path)?)
}

pub fn parse_record_id(id: &str) -> Result<RecordId, CliError> {
    id.parse::<RecordId>()
        .map_err(|_| CliError::InvalidRecordId(id.trim().to_string()))
}

/// Session from the flag, falling back to `env_value`
pub fn session_from(
    flag: Option<String>,
    env_value: Option<String>,
) -> Result<Option<SessionId>, CliError> {
    match flag {
        Some(value) => SessionId::parse(&value).map(Some).ok_or(CliError::EmptySession),
        None => Ok(env_value.as_deref().and_then(SessionId::parse)),
    }
}

pub fn optional_session(flag: Option<String>) -> Result<Option<SessionId>, CliError> {
    session_from(flag, env::var("CONCORD_SESSION").ok())
}

pub fn require_session(flag: Option<String>) -> Result<SessionId, CliError> {
    optional_session(flag)?.ok_or(CliError::MissingSession)
}

fn split_assignment(assignment: &str) -> Result<(&str, &str), CliError> {
    match assignment.split_once('=') {
        Some((field, value)) if !field.trim().is_empty() => Ok((field.trim(), value)),
        _ => Err(CliError::InvalidAssignment(assignment.to_string())),
    }
}

/// Build a change set from `--set` text values and `--set-json` values
pub fn parse_field_changes(text: &[String], json: &[String]) -> Result<FieldMap, CliError> {
    let mut changes = FieldMap::new();

    for assignment in text {
        let (field, value) = split_assignment(assignment)?;
        changes.insert(field.to_string(), Value::String(value.to_string()));
    }
    for assignment in json {
        let (field, raw) = split_assignment(assignment)?;
        let value = serde_json::from_str(raw).map_err(|source| CliError::InvalidJson {
            field: field.to_string(),
            source,
        })?;
        changes.insert(field.to_string(), value);
    }

    Ok(changes)
}

pub fn parse_choices(choices: &[String]) -> Result<BTreeMap<String, ResolutionChoice>, CliError> {
    choices
        .iter()
        .map(|assignment| {
            let (field, raw) = split_assignment(assignment)?;
            let choice = raw.parse::<ResolutionChoice>().map_err(CliError::InvalidChoice)?;
            Ok((field.to_string(), choice))
        })
        .collect()
}

/// Strings print bare, everything else as compact JSON
pub fn format_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

pub fn format_field_lines(fields: &FieldMap) -> Vec<String> {
    fields
        .iter()
        .map(|(field, value)| format!("  {field} = {}", format_value(value)))
        .collect()
}

pub fn format_record_lines(record: &VersionedRecord) -> Vec<String> {
    let mut lines = vec![
        format!("id:       {}", record.id),
        format!("version:  {}", record.version),
        format!("created:  {}", format_timestamp(record.created_at)),
        format!("updated:  {}", format_timestamp(record.updated_at)),
        "fields:".to_string(),
    ];
    lines.extend(format_field_lines(&record.fields));
    lines
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
