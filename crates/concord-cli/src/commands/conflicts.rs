use std::path::Path;

use concord_core::cache::SqliteCache;
use concord_core::conflict::{AutoResolution, ConflictPresentation, ResolutionOutcome};
use concord_core::db::SqliteRecordStore;
use concord_core::models::HistoryEntry;
use concord_core::util::format_timestamp;
use concord_core::{AutoSaver, ConcurrencyConfig};

use crate::cli::{ConflictCommands, StrategyArg};
use crate::commands::common::{
    format_value, open_database, parse_choices, parse_record_id, print_json, require_session,
};
use crate::error::CliError;

pub fn run_conflicts(
    command: ConflictCommands,
    db_path: &Path,
    config: &ConcurrencyConfig,
) -> Result<(), CliError> {
    let db = open_database(db_path)?;
    let store = SqliteRecordStore::new(db.connection());
    let cache = SqliteCache::new(db.connection());
    let saver = AutoSaver::new(&store, &cache, config);
    let resolver = saver.resolver();

    match command {
        ConflictCommands::Show { id, session, json } => {
            let presentation = resolver
                .present_conflicts_for_resolution(&parse_record_id(&id)?, &require_session(session)?)?;
            if json {
                print_json(&presentation)?;
            } else {
                print_lines(format_presentation_lines(&presentation));
            }
        }
        ConflictCommands::Resolve {
            id,
            choices,
            session,
            json,
        } => {
            let choices = parse_choices(&choices)?;
            let outcome = saver.resolve_conflicts(
                &parse_record_id(&id)?,
                &require_session(session)?,
                &choices,
            )?;
            if json {
                print_json(&outcome)?;
            } else {
                print_lines(format_resolution_lines(&outcome));
            }
        }
        ConflictCommands::Auto {
            id,
            strategy,
            session,
            json,
        } => run_auto(&saver, &id, strategy, session, json)?,
        ConflictCommands::History { id, limit, json } => {
            let entries = resolver.get_conflict_history(&parse_record_id(&id)?, limit)?;
            if json {
                print_json(&entries)?;
            } else if entries.is_empty() {
                println!("No conflict history");
            } else {
                print_lines(format_history_lines(&entries));
            }
        }
        ConflictCommands::Clear { id, session } => {
            let cleared = resolver
                .clear_resolved_conflicts(&parse_record_id(&id)?, &require_session(session)?)?;
            if cleared {
                println!("Cleared conflict session");
            } else {
                println!("No conflict session to clear");
            }
        }
    }

    Ok(())
}

fn run_auto(
    saver: &AutoSaver<'_, SqliteRecordStore<'_>, SqliteCache<'_>>,
    id: &str,
    strategy: StrategyArg,
    session: Option<String>,
    as_json: bool,
) -> Result<(), CliError> {
    let auto = saver.auto_resolve_conflicts(
        &parse_record_id(id)?,
        &require_session(session)?,
        strategy.into(),
    )?;
    if as_json {
        print_json(&auto)?;
    } else {
        print_lines(format_auto_lines(&auto));
    }
    Ok(())
}

fn print_lines(lines: Vec<String>) {
    for line in lines {
        println!("{line}");
    }
}

pub fn format_presentation_lines(presentation: &ConflictPresentation) -> Vec<String> {
    if !presentation.has_conflicts {
        return vec!["No pending conflicts".to_string()];
    }

    let mut lines = vec![format!(
        "{} conflict(s) against server version {}",
        presentation.conflict_count,
        presentation
            .model_version
            .map_or_else(|| "?".to_string(), |version| version.to_string())
    )];
    for field in &presentation.fields {
        let options = field
            .suggestions
            .iter()
            .map(|suggestion| suggestion.action.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        lines.push(format!("{} [{}]", field.label, field.conflict_type));
        lines.push(format!("  yours:   {}", field.your_version.preview));
        lines.push(format!(
            "  server:  {} ({})",
            field.server_version.preview, field.server_version.timestamp
        ));
        lines.push(format!("  options: {options}"));
    }
    lines
}

pub fn format_resolution_lines(outcome: &ResolutionOutcome) -> Vec<String> {
    let mut lines: Vec<String> = outcome
        .resolved_fields
        .iter()
        .map(|(field, value)| format!("  {field} = {}", format_value(value)))
        .collect();
    lines.insert(0, format!("Saved version {}", outcome.new_version));
    if !outcome.remaining_fields.is_empty() {
        lines.push(format!("Still pending: {}", outcome.remaining_fields.join(", ")));
    }
    lines
}

pub fn format_auto_lines(auto: &AutoResolution) -> Vec<String> {
    let mut lines = vec![format!(
        "{} resolved {} field(s)",
        auto.strategy, auto.auto_resolved_count
    )];
    if let Some(outcome) = &auto.resolution {
        lines.push(format!("Saved version {}", outcome.new_version));
    }
    if auto.manual_resolution_required > 0 {
        lines.push(format!(
            "Needs manual resolution: {}",
            auto.manual_fields.join(", ")
        ));
    }
    lines
}

pub fn format_history_lines(entries: &[HistoryEntry]) -> Vec<String> {
    entries
        .iter()
        .map(|entry| {
            format!(
                "{}  {}  {} field(s)  {}",
                format_timestamp(entry.timestamp),
                entry.session_id,
                entry.conflict_count,
                if entry.resolved { "resolved" } else { "failed" }
            )
        })
        .collect()
}
