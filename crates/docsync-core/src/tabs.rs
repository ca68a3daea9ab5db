//! Open documents and the active-tab pointer.
//!
//! `TabRegistry` is plain data: it owns each tab's buffer, disk baseline,
//! status and autosave timers, and knows which tab is active. All I/O and
//! event emission happens in the engine around it.

use crate::autosave::AutosaveController;
use crate::path::DocPath;
use crate::status::TabStatus;
use serde::{Serialize, Serializer};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
#[error("Invalid tab ID: {0}")]
pub struct TabIdError(#[from] uuid::Error);

/// Identifier of an open tab. Random, never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TabId(Uuid);

impl TabId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First eight hex chars, enough to tell tabs apart in logs.
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for TabId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for TabId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TabId {
    type Err = TabIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Serialize for TabId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Whether the tab accepts edits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TabMode {
    #[default]
    Editable,
    /// Preview surfaces: never autosaved, every external change prompts.
    ReadOnly,
}

/// Snapshot of a tab for the UI layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tab {
    pub id: TabId,
    pub path: DocPath,
    pub display_name: String,
    pub extension: Option<String>,
    pub status: TabStatus,
    pub mode: TabMode,
    pub dirty: bool,
    pub active: bool,
}

/// Registry-owned state of one open tab.
pub struct TabEntry {
    pub(crate) id: TabId,
    pub(crate) path: DocPath,
    pub(crate) mode: TabMode,
    /// Content of the editing surface.
    pub(crate) buffer: String,
    /// Disk content as last loaded or written by the app. `None` until an
    /// untitled document is first saved.
    pub(crate) baseline: Option<String>,
    pub(crate) status: TabStatus,
    pub(crate) autosave: AutosaveController,
}

impl TabEntry {
    pub(crate) fn new(
        path: DocPath,
        mode: TabMode,
        buffer: String,
        baseline: Option<String>,
        status: TabStatus,
        autosave: AutosaveController,
    ) -> Self {
        Self {
            id: TabId::new(),
            path,
            mode,
            buffer,
            baseline,
            status,
            autosave,
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.mode == TabMode::Editable && self.status.is_dirty()
    }

    /// True if the buffer holds anything not on disk, whether or not the
    /// draft timer has caught up yet.
    pub fn has_local_edits(&self) -> bool {
        if self.mode == TabMode::ReadOnly {
            return false;
        }
        self.status.is_dirty()
            || match &self.baseline {
                Some(baseline) => *baseline != self.buffer,
                None => !self.buffer.is_empty(),
            }
    }

    pub fn buffer_matches_baseline(&self) -> bool {
        self.baseline.as_deref() == Some(self.buffer.as_str())
    }

    fn view(&self, active: bool) -> Tab {
        Tab {
            id: self.id,
            path: self.path.clone(),
            display_name: self.path.display_name(),
            extension: self.path.extension(),
            status: self.status.clone(),
            mode: self.mode,
            dirty: self.is_dirty(),
            active,
        }
    }
}

/// Ordered list of open tabs plus the active pointer.
#[derive(Default)]
pub struct TabRegistry {
    tabs: Vec<TabEntry>,
    active: Option<TabId>,
}

impl TabRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a tab. Does not activate it.
    pub fn insert(&mut self, entry: TabEntry) -> TabId {
        let id = entry.id;
        self.tabs.push(entry);
        id
    }

    pub fn find_by_path(&self, path: &DocPath) -> Option<TabId> {
        self.tabs.iter().find(|t| t.path == *path).map(|t| t.id)
    }

    pub fn get(&self, id: TabId) -> Option<&TabEntry> {
        self.tabs.iter().find(|t| t.id == id)
    }

    pub fn get_mut(&mut self, id: TabId) -> Option<&mut TabEntry> {
        self.tabs.iter_mut().find(|t| t.id == id)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut TabEntry> {
        self.tabs.iter_mut()
    }

    /// Make `id` the active tab. Returns false for an unknown id.
    pub fn activate(&mut self, id: TabId) -> bool {
        if self.get(id).is_none() {
            return false;
        }
        self.active = Some(id);
        true
    }

    pub fn active(&self) -> Option<TabId> {
        self.active
    }

    pub fn active_entry(&self) -> Option<&TabEntry> {
        self.active.and_then(|id| self.get(id))
    }

    /// Remove a tab. If it was active, the tab before it (or the first tab)
    /// becomes active.
    pub fn remove(&mut self, id: TabId) -> Option<TabEntry> {
        let index = self.tabs.iter().position(|t| t.id == id)?;
        let entry = self.tabs.remove(index);

        if self.active == Some(id) {
            self.active = self
                .tabs
                .get(index.saturating_sub(1))
                .or_else(|| self.tabs.first())
                .map(|t| t.id);
        }

        Some(entry)
    }

    /// Point a tab at a new path (save-as or rename on disk).
    pub fn retarget(&mut self, id: TabId, path: DocPath) -> bool {
        match self.get_mut(id) {
            Some(entry) => {
                entry.path = path;
                true
            }
            None => false,
        }
    }

    pub fn contains_path(&self, path: &DocPath) -> bool {
        self.tabs.iter().any(|t| t.path == *path)
    }

    pub fn view(&self, id: TabId) -> Option<Tab> {
        self.get(id).map(|t| t.view(self.active == Some(id)))
    }

    pub fn tabs(&self) -> Vec<Tab> {
        self.tabs
            .iter()
            .map(|t| t.view(self.active == Some(t.id)))
            .collect()
    }
}
