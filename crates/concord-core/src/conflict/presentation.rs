//! Human-facing view of a conflict session

use serde::Serialize;
use serde_json::Value;

use super::merge::is_auto_mergeable;
use crate::models::{ConflictSession, ConflictType, FieldConflict, ResolutionChoice, SessionId};
use crate::util::{format_timestamp, is_blank};

/// What a client needs to render a conflict choice screen
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConflictPresentation {
    pub has_conflicts: bool,
    pub conflict_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_version: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    /// Session creation time (Unix ms)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    pub fields: Vec<FieldPresentation>,
}

impl ConflictPresentation {
    /// Nothing to resolve
    pub const fn empty() -> Self {
        Self {
            has_conflicts: false,
            conflict_count: 0,
            model_version: None,
            session_id: None,
            timestamp: None,
            fields: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldPresentation {
    pub field: String,
    pub label: String,
    pub your_version: VersionView,
    pub server_version: VersionView,
    pub conflict_type: ConflictType,
    pub suggestions: Vec<Suggestion>,
    pub auto_mergeable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VersionView {
    pub value: Value,
    pub preview: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Suggestion {
    pub action: ResolutionChoice,
    pub label: &'static str,
    pub description: &'static str,
}

pub(crate) fn present_session(
    session: &ConflictSession,
    label_for: impl Fn(&str) -> String,
    preview_chars: usize,
) -> ConflictPresentation {
    let report = &session.report;
    let server_timestamp = format_timestamp(report.last_modified);

    let fields = report
        .conflicts
        .iter()
        .map(|conflict| FieldPresentation {
            field: conflict.field.clone(),
            label: label_for(&conflict.field),
            your_version: VersionView {
                value: conflict.incoming_value.clone(),
                preview: preview(&conflict.incoming_value, preview_chars),
                timestamp: "Your changes".to_string(),
            },
            server_version: VersionView {
                value: conflict.current_value.clone(),
                preview: preview(&conflict.current_value, preview_chars),
                timestamp: server_timestamp.clone(),
            },
            conflict_type: conflict.conflict_type,
            suggestions: suggestions(conflict),
            auto_mergeable: is_auto_mergeable(conflict),
        })
        .collect();

    ConflictPresentation {
        has_conflicts: true,
        conflict_count: report.total_conflicts,
        model_version: Some(report.model_version),
        session_id: Some(session.session_id.clone()),
        timestamp: Some(session.created_at),
        fields,
    }
}

/// Default label: underscores become spaces, first letter upper-cased
pub fn field_label(field: &str) -> String {
    let spaced = field.replace('_', " ");
    let mut chars = spaced.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}

/// Short rendering of a value for display
pub fn preview(value: &Value, max_chars: usize) -> String {
    if is_blank(value) {
        return "(empty)".to_string();
    }

    let text = match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    };

    if text.chars().count() <= max_chars {
        text
    } else {
        let take_len = max_chars.saturating_sub(3);
        let mut truncated = text.chars().take(take_len).collect::<String>();
        truncated.push_str("...");
        truncated
    }
}

/// Resolution options offered for one conflict
pub fn suggestions(conflict: &FieldConflict) -> Vec<Suggestion> {
    let mut options = vec![
        Suggestion {
            action: ResolutionChoice::KeepYours,
            label: "Keep your version",
            description: "Use your changes and discard server changes",
        },
        Suggestion {
            action: ResolutionChoice::KeepServer,
            label: "Keep server version",
            description: "Use server changes and discard your changes",
        },
    ];

    if conflict.conflict_type.is_text() {
        options.push(Suggestion {
            action: ResolutionChoice::Merge,
            label: "Try to merge both",
            description: "Attempt to combine both versions",
        });
    }

    options
}
