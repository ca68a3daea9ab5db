//! Per-tab synchronization status.
//!
//! A single tagged value replaces the loose combination of a dirty boolean,
//! an "is saving" flag and a pending-notification marker. Transitions are
//! named functions; invalid ones leave the status unchanged.

use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum TabStatus {
    /// Buffer matches disk, no draft.
    #[default]
    Clean,
    /// A draft holds edits that are not on disk.
    Dirty,
    /// A disk write is in flight. `dirty` is the status to fall back to if
    /// the write fails.
    SavePending { dirty: bool },
    /// The file changed on disk while local edits existed and the user has not
    /// decided yet. `external` is the disk content that raised the prompt.
    ConflictPending { external: String },
}

impl TabStatus {
    /// True whenever unsaved edits exist.
    pub fn is_dirty(&self) -> bool {
        match self {
            TabStatus::Clean => false,
            TabStatus::Dirty => true,
            TabStatus::SavePending { dirty } => *dirty,
            TabStatus::ConflictPending { .. } => true,
        }
    }

    pub fn is_conflict_pending(&self) -> bool {
        matches!(self, TabStatus::ConflictPending { .. })
    }

    pub fn is_save_pending(&self) -> bool {
        matches!(self, TabStatus::SavePending { .. })
    }

    /// A draft was written. An unresolved conflict stays unresolved.
    pub fn mark_dirty(&mut self) {
        match self {
            TabStatus::Clean | TabStatus::Dirty => *self = TabStatus::Dirty,
            TabStatus::SavePending { dirty } => *dirty = true,
            TabStatus::ConflictPending { .. } => {}
        }
    }

    /// The buffer was found to match disk and any draft was removed.
    pub fn mark_clean(&mut self) {
        match self {
            TabStatus::SavePending { dirty } => *dirty = false,
            TabStatus::ConflictPending { .. } => {}
            _ => *self = TabStatus::Clean,
        }
    }

    /// A disk write started. Conflicts must be resolved before autosaving.
    pub fn begin_save(&mut self) {
        match self {
            TabStatus::Clean => *self = TabStatus::SavePending { dirty: false },
            TabStatus::Dirty => *self = TabStatus::SavePending { dirty: true },
            TabStatus::SavePending { .. } | TabStatus::ConflictPending { .. } => {}
        }
    }

    /// The write succeeded and the draft it consumed has been removed.
    pub fn save_succeeded(&mut self) {
        if !self.is_conflict_pending() {
            *self = TabStatus::Clean;
        }
    }

    /// The write succeeded but newer edits arrived meanwhile.
    pub fn save_superseded(&mut self) {
        if self.is_save_pending() {
            *self = TabStatus::Dirty;
        }
    }

    /// The write failed; whatever was dirty stays dirty.
    pub fn save_failed(&mut self) {
        if let TabStatus::SavePending { dirty } = *self {
            *self = if dirty {
                TabStatus::Dirty
            } else {
                TabStatus::Clean
            };
        }
    }

    /// An external change arrived while local edits exist.
    pub fn raise_conflict(&mut self, external: String) {
        *self = TabStatus::ConflictPending { external };
    }

    /// The user kept their version. Returns the external content they
    /// dismissed so identical notifications can be dropped.
    pub fn keep_current(&mut self) -> Option<String> {
        match std::mem::replace(self, TabStatus::Dirty) {
            TabStatus::ConflictPending { external } => Some(external),
            other => {
                *self = other;
                None
            }
        }
    }

    /// The buffer was replaced with disk content.
    pub fn reloaded(&mut self) {
        *self = TabStatus::Clean;
    }
}
