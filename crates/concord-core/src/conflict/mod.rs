//! Field-level conflict detection and resolution

mod detection;
mod merge;
mod presentation;
mod resolver;
mod sessions;

pub use detection::{classify, detect_against, ConflictDetector};
pub use merge::{apply_choice, is_auto_mergeable, merge_text, strategy_choice};
pub use presentation::{
    field_label, preview, suggestions, ConflictPresentation, FieldPresentation, Suggestion,
    VersionView,
};
pub use resolver::{AutoResolution, ConflictResolver, ResolutionOutcome};
pub use sessions::{history_key, session_key, SessionStore};
