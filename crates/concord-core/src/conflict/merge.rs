//! Applying resolution choices and the three-way text merge heuristic

use serde_json::Value;

use crate::models::{ConflictType, FieldConflict, ResolutionChoice, ResolutionStrategy};
use crate::util::is_blank;

/// Value to write for `conflict` under `choice`
pub fn apply_choice(conflict: &FieldConflict, choice: ResolutionChoice) -> Value {
    match choice {
        ResolutionChoice::KeepYours => conflict.incoming_value.clone(),
        ResolutionChoice::KeepServer => conflict.current_value.clone(),
        ResolutionChoice::Merge => match text_sides(conflict) {
            Some((original, current, incoming)) => {
                Value::String(merge_text(original, current, incoming))
            }
            // non-text values cannot be merged
            None => conflict.incoming_value.clone(),
        },
    }
}

/// Merge two edits of the same text.
///
/// With an empty baseline both sides are kept, server first. When one side
/// extends the baseline the longer text wins. Anything else falls back to
/// the incoming text.
pub fn merge_text(original: &str, current: &str, incoming: &str) -> String {
    if original.is_empty() {
        return match (current.is_empty(), incoming.is_empty()) {
            (true, _) => incoming.to_string(),
            (false, true) => current.to_string(),
            (false, false) => format!("{current}\n\n{incoming}"),
        };
    }

    if current.starts_with(original) || incoming.starts_with(original) {
        return if current.len() > incoming.len() {
            current.to_string()
        } else {
            incoming.to_string()
        };
    }

    tracing::debug!("Divergent text edits, keeping the incoming text");
    incoming.to_string()
}

/// Whether smart merge may resolve `conflict` without asking the user
pub fn is_auto_mergeable(conflict: &FieldConflict) -> bool {
    conflict.conflict_type == ConflictType::TextExpansion
        || (is_blank(&conflict.original_value) && !is_blank(&conflict.incoming_value))
}

/// Choice a strategy makes for `conflict`, or `None` when it needs a human
pub fn strategy_choice(
    strategy: ResolutionStrategy,
    conflict: &FieldConflict,
) -> Option<ResolutionChoice> {
    match strategy {
        ResolutionStrategy::LastWriteWins => Some(ResolutionChoice::KeepYours),
        ResolutionStrategy::FirstWriteWins => Some(ResolutionChoice::KeepServer),
        ResolutionStrategy::SmartMerge => {
            is_auto_mergeable(conflict).then_some(ResolutionChoice::Merge)
        }
    }
}

fn text_sides(conflict: &FieldConflict) -> Option<(&str, &str, &str)> {
    match (
        &conflict.original_value,
        &conflict.current_value,
        &conflict.incoming_value,
    ) {
        (Value::String(original), Value::String(current), Value::String(incoming)) => {
            Some((original, current, incoming))
        }
        _ => None,
    }
}
