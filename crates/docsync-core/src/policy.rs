//! What to do about a change notification for the active document.
//!
//! Decisions are pure functions of what the engine observed; the engine
//! applies them. Order matters: an echo of our own write must never reach
//! the reload/prompt branch, and a tab with local edits must never be
//! reloaded silently.

use crate::status::TabStatus;
use crate::suppress::SelfWriteSuppressor;
use crate::tabs::TabMode;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// A self-write window is open for the path.
    Suppress,
    /// Disk holds exactly what the app last wrote.
    Echo,
    /// Disk matches the content the tab already knows about.
    Unchanged,
    /// Replace the buffer with disk content silently.
    Reload,
    /// Ask the user.
    Prompt,
    /// A prompt for this tab is already open.
    AlreadyPrompted,
}

/// State gathered after reading the file.
#[derive(Debug)]
pub struct Observation<'a> {
    pub disk: &'a str,
    pub last_written: Option<&'a str>,
    pub baseline: Option<&'a str>,
    pub status: &'a TabStatus,
    pub mode: TabMode,
    pub has_local_edits: bool,
}

/// Cheap check before touching the disk.
pub fn screen(suppressor: &SelfWriteSuppressor, path: &Path) -> Option<Decision> {
    suppressor.is_open(path).then_some(Decision::Suppress)
}

pub fn decide(obs: &Observation<'_>) -> Decision {
    if obs.last_written == Some(obs.disk) {
        return Decision::Echo;
    }
    if obs.baseline == Some(obs.disk) {
        return Decision::Unchanged;
    }
    if obs.status.is_conflict_pending() {
        return Decision::AlreadyPrompted;
    }
    if obs.mode == TabMode::ReadOnly || obs.has_local_edits {
        return Decision::Prompt;
    }
    Decision::Reload
}
