//! SynchronizationEngine: reconciles disk, draft cache and editor buffers.
//!
//! The engine is a cheap cloneable handle. Tab state lives behind a std
//! mutex that is never held across an `.await`; every draft or disk write
//! for a path runs under that path's async write lock, so timers, manual
//! saves and reconciliation for one document never interleave.
//!
//! # Usage
//!
//! ```ignore
//! let engine = SynchronizationEngine::new(fs, drafts, watch_service, SyncSettings::default());
//! let _prompts = engine.on_external_change_prompt(|tab, path| ask_user(tab, path));
//!
//! let opened = engine.open_file("/notes/a.md", TabMode::Editable).await?;
//! engine.content_changed(opened.tab_id, "new text".into())?;
//! // watcher listener:
//! engine.handle_file_changed(Path::new("/notes/a.md")).await;
//! ```

use crate::autosave::{AutosaveController, AutosaveSink};
use crate::draft::{Draft, DraftError, DraftStore};
use crate::events::{EventBus, PromptResolution, Subscription, SyncEvent};
use crate::fs::{FileSystem, FsError};
use crate::path::DocPath;
use crate::policy::{self, Decision, Observation};
use crate::settings::SyncSettings;
use crate::snapshot::LastWrittenSnapshot;
use crate::status::TabStatus;
use crate::suppress::SelfWriteSuppressor;
use crate::tabs::{Tab, TabEntry, TabId, TabMode, TabRegistry};
use crate::watch::{ChangeWatcher, WatchError, WatchService};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Unknown tab: {0}")]
    UnknownTab(TabId),

    #[error("Tab {0} is read-only")]
    ReadOnly(TabId),

    #[error(transparent)]
    Fs(#[from] FsError),

    #[error(transparent)]
    Draft(#[from] DraftError),

    #[error("No external change prompt pending for {0}")]
    NoPendingPrompt(DocPath),

    #[error("A tab is already open for {0}")]
    TabExists(DocPath),
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Result of `open_file`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenOutcome {
    pub tab_id: TabId,
    /// The buffer was restored from a draft that differs from disk.
    pub recovered_draft: bool,
    /// The file was already open; its tab was activated.
    pub already_open: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved,
    /// No draft and no unsaved buffer: nothing was written.
    NothingToSave,
    /// Untitled documents need a target path first.
    NeedsSaveAs,
}

/// The user's answer to "this tab has unsaved changes".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseDecision {
    Save,
    Discard,
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    Closed,
    /// The tab has unsaved edits and no decision was given.
    NeedsDecision,
    Cancelled,
    /// `Save` was chosen for an untitled tab.
    NeedsSaveAs,
}

/// What `handle_file_changed` did with a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// Not the active document's path.
    NotActive,
    /// Dropped by an open self-write window.
    Suppressed,
    /// Disk matches our last write.
    Echo,
    /// Disk matches what the tab already has.
    Unchanged,
    Reloaded,
    Prompted,
    /// A prompt is already open; the event was dropped.
    AlreadyPrompted,
    /// The file could not be read; nothing changed.
    ReadFailed,
}

struct State {
    tabs: TabRegistry,
    settings: SyncSettings,
}

struct Inner {
    fs: Arc<dyn FileSystem>,
    drafts: Arc<dyn DraftStore>,
    watcher: ChangeWatcher,
    suppressor: SelfWriteSuppressor,
    snapshot: LastWrittenSnapshot,
    events: Arc<EventBus>,
    state: Mutex<State>,
    /// Per-path write locks.
    write_locks: Mutex<HashMap<DocPath, Arc<tokio::sync::Mutex<()>>>>,
}

#[derive(Clone)]
pub struct SynchronizationEngine {
    inner: Arc<Inner>,
}

impl SynchronizationEngine {
    pub fn new(
        fs: Arc<dyn FileSystem>,
        drafts: Arc<dyn DraftStore>,
        watch_service: Arc<dyn WatchService>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                fs,
                drafts,
                watcher: ChangeWatcher::new(watch_service),
                suppressor: SelfWriteSuppressor::with_window(settings.suppression_window()),
                snapshot: LastWrittenSnapshot::new(),
                events: Arc::new(EventBus::new()),
                state: Mutex::new(State {
                    tabs: TabRegistry::new(),
                    settings,
                }),
                write_locks: Mutex::new(HashMap::new()),
            }),
        }
    }

    // ---- Events ----

    /// Subscribe to every engine event.
    pub fn subscribe(&self, callback: impl Fn(SyncEvent) + Send + Sync + 'static) -> Subscription {
        self.inner.events.subscribe(callback)
    }

    /// Subscribe to external change prompts only.
    pub fn on_external_change_prompt(
        &self,
        callback: impl Fn(TabId, DocPath) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.events.subscribe(move |event| {
            if let SyncEvent::ExternalChangePrompt { tab_id, path } = event {
                callback(tab_id, path);
            }
        })
    }

    fn emit(&self, event: SyncEvent) {
        self.inner.events.emit(event);
    }

    // ---- Queries ----

    pub fn tab(&self, id: TabId) -> Option<Tab> {
        self.state().tabs.view(id)
    }

    pub fn tabs(&self) -> Vec<Tab> {
        self.state().tabs.tabs()
    }

    pub fn active_tab(&self) -> Option<Tab> {
        let state = self.state();
        state.tabs.active().and_then(|id| state.tabs.view(id))
    }

    /// Current buffer of a tab.
    pub fn content(&self, id: TabId) -> Option<String> {
        self.state().tabs.get(id).map(|t| t.buffer.clone())
    }

    pub fn find_tab(&self, path: &DocPath) -> Option<TabId> {
        self.state().tabs.find_by_path(path)
    }

    pub fn settings(&self) -> SyncSettings {
        self.state().settings.clone()
    }

    /// Path the change watcher is bound to.
    pub async fn watched_path(&self) -> Option<PathBuf> {
        self.inner.watcher.bound_path().await
    }

    pub async fn has_draft(&self, path: &DocPath) -> Result<bool> {
        Ok(self.inner.drafts.get_draft(path).await?.is_some())
    }

    pub async fn get_draft_content(&self, path: &DocPath) -> Result<Option<String>> {
        Ok(self.inner.drafts.get_draft(path).await?.map(|d| d.content))
    }

    /// All drafts in the cache, including those of documents not open.
    pub async fn list_drafts(&self) -> Result<Vec<Draft>> {
        Ok(self.inner.drafts.list_drafts().await?)
    }

    // ---- Tab lifecycle ----

    /// Open a file, or activate its tab if it is already open.
    ///
    /// A draft that differs from disk becomes the buffer and the tab starts
    /// dirty. A draft identical to disk is stale and removed.
    pub async fn open_file(&self, path: impl Into<PathBuf>, mode: TabMode) -> Result<OpenOutcome> {
        let file = path.into();
        let doc = DocPath::file(&file);

        if let Some(tab_id) = self.activate_existing(&doc) {
            self.rebind().await;
            return Ok(OpenOutcome {
                tab_id,
                recovered_draft: false,
                already_open: true,
            });
        }

        let disk = self.inner.fs.read_text(&file).await?;

        let draft = match self.inner.drafts.get_draft(&doc).await {
            Ok(draft) => draft,
            Err(e) => {
                warn!("Failed to read draft for {}: {}", doc, e);
                None
            }
        };

        let (buffer, status) = match draft {
            Some(draft) if mode == TabMode::Editable && draft.content != disk => {
                info!("Recovered draft for {}", doc);
                (draft.content, TabStatus::Dirty)
            }
            Some(draft) if draft.content == disk => {
                debug!("Removing stale draft for {}", doc);
                self.remove_draft_logged(&doc).await;
                (disk.clone(), TabStatus::Clean)
            }
            _ => (disk.clone(), TabStatus::Clean),
        };
        let recovered_draft = status.is_dirty();

        let tab_id = {
            let mut state = self.state();
            // Opened concurrently while we were reading.
            if let Some(existing) = state.tabs.find_by_path(&doc) {
                state.tabs.activate(existing);
                existing
            } else {
                // The baseline comes from disk, not from one of our writes.
                self.inner.snapshot.forget(&file);
                let autosave = AutosaveController::new(&state.settings);
                let entry = TabEntry::new(doc.clone(), mode, buffer, Some(disk), status, autosave);
                let id = state.tabs.insert(entry);
                state.tabs.activate(id);
                id
            }
        };

        info!("Opened {} ({})", doc, tab_id.short());
        if recovered_draft {
            self.emit(SyncEvent::DirtyChanged {
                tab_id,
                dirty: true,
            });
        }
        self.rebind().await;

        Ok(OpenOutcome {
            tab_id,
            recovered_draft,
            already_open: false,
        })
    }

    /// Create an untitled document with an empty draft. It starts dirty.
    pub async fn new_untitled(&self, name: impl Into<String>) -> Result<TabId> {
        let doc = DocPath::untitled(name);
        if self.state().tabs.contains_path(&doc) {
            return Err(EngineError::TabExists(doc));
        }

        match self.inner.drafts.save_draft(&doc, "").await {
            Ok(()) => self.emit(SyncEvent::DraftSaved { path: doc.clone() }),
            Err(e) => warn!("Failed to save draft for {}: {}", doc, e),
        }

        let tab_id = self.insert_untitled(doc.clone(), String::new(), true)?;
        info!("Created {} ({})", doc, tab_id.short());
        self.emit(SyncEvent::DirtyChanged {
            tab_id,
            dirty: true,
        });
        self.rebind().await;
        Ok(tab_id)
    }

    /// Reopen untitled documents whose drafts survived a restart.
    pub async fn recover_untitled(&self) -> Result<Vec<TabId>> {
        let drafts = self.inner.drafts.list_drafts().await?;
        let mut recovered = Vec::new();

        for draft in drafts.into_iter().filter(|d| d.path.is_untitled()) {
            if self.state().tabs.contains_path(&draft.path) {
                continue;
            }
            let activate = self.state().tabs.active().is_none();
            let id = self.insert_untitled(draft.path.clone(), draft.content, activate)?;
            info!("Recovered {} ({})", draft.path, id.short());
            recovered.push(id);
        }

        if !recovered.is_empty() {
            self.rebind().await;
        }
        Ok(recovered)
    }

    fn insert_untitled(&self, doc: DocPath, buffer: String, activate: bool) -> Result<TabId> {
        let mut state = self.state();
        if state.tabs.contains_path(&doc) {
            return Err(EngineError::TabExists(doc));
        }
        let autosave = AutosaveController::new(&state.settings);
        let entry = TabEntry::new(
            doc,
            TabMode::Editable,
            buffer,
            None,
            TabStatus::Dirty,
            autosave,
        );
        let id = state.tabs.insert(entry);
        if activate {
            state.tabs.activate(id);
        }
        Ok(id)
    }

    fn activate_existing(&self, doc: &DocPath) -> Option<TabId> {
        let mut state = self.state();
        let id = state.tabs.find_by_path(doc)?;
        state.tabs.activate(id);
        Some(id)
    }

    /// Make a tab active and move the watcher to it. Timers of the previously
    /// active tab keep running.
    pub async fn switch_tab(&self, id: TabId) -> Result<()> {
        if !self.state().tabs.activate(id) {
            return Err(EngineError::UnknownTab(id));
        }
        debug!("Switched to {}", id.short());
        self.rebind().await;
        Ok(())
    }

    /// Close a tab. A tab with unsaved edits needs a decision.
    pub async fn close_tab(&self, id: TabId, decision: Option<CloseDecision>) -> Result<CloseOutcome> {
        let (path, needs_decision) = {
            let state = self.state();
            let entry = state.tabs.get(id).ok_or(EngineError::UnknownTab(id))?;
            (entry.path.clone(), entry.has_local_edits())
        };

        if needs_decision {
            match decision {
                None => return Ok(CloseOutcome::NeedsDecision),
                Some(CloseDecision::Cancel) => return Ok(CloseOutcome::Cancelled),
                Some(CloseDecision::Save) => {
                    if self.save(id).await? == SaveOutcome::NeedsSaveAs {
                        return Ok(CloseOutcome::NeedsSaveAs);
                    }
                }
                Some(CloseDecision::Discard) => self.discard_draft(&path).await?,
            }
        }

        let removed = self.state().tabs.remove(id);
        // Dropping the entry cancels its timers.
        drop(removed);
        self.prune_write_locks();

        info!("Closed {} ({})", path, id.short());
        self.rebind().await;
        Ok(CloseOutcome::Closed)
    }

    /// A file was renamed on disk: move its draft, snapshot entry and tab.
    pub async fn rename_path(&self, old: &Path, new: &Path) -> Result<()> {
        let old_doc = DocPath::file(old);
        let new_doc = DocPath::file(new);
        if self.state().tabs.contains_path(&new_doc) {
            return Err(EngineError::TabExists(new_doc));
        }

        let _guards = self.lock_paths(&old_doc, &new_doc).await;

        if let Err(e) = self.inner.drafts.rename_draft(&old_doc, &new_doc).await {
            warn!("Failed to move draft {} -> {}: {}", old_doc, new_doc, e);
        }
        self.inner.snapshot.rename(old, new);

        let tab = self.state().tabs.find_by_path(&old_doc);
        if let Some(id) = tab {
            self.state().tabs.retarget(id, new_doc.clone());
        }

        info!("Renamed {} -> {}", old_doc, new_doc);
        self.rebind().await;
        Ok(())
    }

    // ---- Editing and saving ----

    /// The editing surface changed. Re-arms the tab's autosave timers.
    pub fn content_changed(&self, id: TabId, content: String) -> Result<()> {
        let sink: Arc<dyn AutosaveSink> = Arc::new(self.clone());
        let mut state = self.state();
        let auto_save = state.settings.auto_save;
        let entry = state.tabs.get_mut(id).ok_or(EngineError::UnknownTab(id))?;
        if entry.mode == TabMode::ReadOnly {
            return Err(EngineError::ReadOnly(id));
        }

        entry.buffer = content;
        let to_disk = auto_save && !entry.path.is_untitled();
        entry.autosave.content_changed(sink, id, to_disk);
        Ok(())
    }

    /// Manual save of a tab.
    pub async fn save(&self, id: TabId) -> Result<SaveOutcome> {
        let path = {
            let state = self.state();
            let entry = state.tabs.get(id).ok_or(EngineError::UnknownTab(id))?;
            entry.path.clone()
        };
        self.commit_draft_to_disk(&path).await
    }

    /// Write the draft (or the unsaved buffer) for `path` to disk.
    ///
    /// An open tab's timers are cancelled and its latest buffer flushed into
    /// the draft first. A pending external change prompt is resolved as Keep
    /// Current, since saving overwrites the external version.
    pub async fn commit_draft_to_disk(&self, path: &DocPath) -> Result<SaveOutcome> {
        let Some(file) = path.as_file().map(Path::to_path_buf) else {
            return Ok(SaveOutcome::NeedsSaveAs);
        };

        let tab = {
            let mut state = self.state();
            match state.tabs.find_by_path(path) {
                Some(id) => {
                    let entry = state.tabs.get_mut(id).ok_or(EngineError::UnknownTab(id))?;
                    if entry.mode == TabMode::ReadOnly {
                        return Err(EngineError::ReadOnly(id));
                    }
                    entry.autosave.cancel_all();
                    Some(id)
                }
                None => None,
            }
        };

        let _guard = self.lock_path(path).await;

        let mut unsaved_buffer = None;
        if let Some(id) = tab {
            let kept = self.update_tab(id, |t| {
                let external = t.status.keep_current()?;
                t.baseline = Some(external);
                Some(())
            });
            if kept.flatten().is_some() {
                self.emit(SyncEvent::PromptResolved {
                    tab_id: id,
                    path: path.clone(),
                    resolution: PromptResolution::KeepCurrent,
                });
            }

            self.write_draft_locked(id, path).await;
            unsaved_buffer = self
                .state()
                .tabs
                .get(id)
                .filter(|t| t.has_local_edits())
                .map(|t| t.buffer.clone());
        }

        let draft = match self.inner.drafts.get_draft(path).await {
            Ok(draft) => draft.map(|d| d.content),
            Err(e) => {
                warn!("Failed to read draft for {}: {}", path, e);
                None
            }
        };

        let Some(content) = draft.or(unsaved_buffer) else {
            debug!("Nothing to save for {}", path);
            return Ok(SaveOutcome::NothingToSave);
        };

        if let Some(id) = tab {
            self.update_tab(id, |t| t.status.begin_save());
        }
        self.commit_locked(tab, path, &file, content).await?;
        Ok(SaveOutcome::Saved)
    }

    /// Write a tab's content to a new path and point the tab at it.
    pub async fn save_as(&self, id: TabId, target: impl Into<PathBuf>) -> Result<()> {
        let file = target.into();
        let target_doc = DocPath::file(&file);

        let old = {
            let mut state = self.state();
            if state
                .tabs
                .find_by_path(&target_doc)
                .is_some_and(|other| other != id)
            {
                return Err(EngineError::TabExists(target_doc));
            }
            let entry = state.tabs.get_mut(id).ok_or(EngineError::UnknownTab(id))?;
            if entry.mode == TabMode::ReadOnly {
                return Err(EngineError::ReadOnly(id));
            }
            entry.autosave.cancel_all();
            entry.path.clone()
        };

        if old == target_doc {
            self.commit_draft_to_disk(&old).await?;
            return Ok(());
        }

        let _guards = self.lock_paths(&old, &target_doc).await;
        // Keeps the latest edits recoverable if the write below fails.
        self.write_draft_locked(id, &old).await;

        let content = self.content(id).ok_or(EngineError::UnknownTab(id))?;
        self.inner.suppressor.open(&file);
        if let Err(e) = self.inner.fs.write_text(&file, &content).await {
            warn!("Failed to write {}: {}", target_doc, e);
            self.emit(SyncEvent::WriteFailed {
                path: target_doc,
                error: e.to_string(),
            });
            return Err(e.into());
        }
        self.inner.snapshot.record(&file, &content);

        self.remove_draft_logged(&old).await;
        self.remove_draft_logged(&target_doc).await;

        let sink: Arc<dyn AutosaveSink> = Arc::new(self.clone());
        let auto_save = self.state().settings.auto_save;
        self.update_tab(id, |t| {
            t.path = target_doc.clone();
            t.baseline = Some(content.clone());
            if t.buffer == content {
                t.status = TabStatus::Clean;
            } else {
                // Edited while the write was in flight.
                t.status = TabStatus::Dirty;
                t.autosave.content_changed(sink, id, auto_save);
            }
        });

        info!("Saved {} as {}", old, target_doc);
        self.emit(SyncEvent::Saved { path: target_doc });
        self.prune_write_locks();
        self.rebind().await;
        Ok(())
    }

    /// Drop the draft for `path`. An open tab falls back to its disk content.
    pub async fn discard_draft(&self, path: &DocPath) -> Result<()> {
        let tab = {
            let mut state = self.state();
            let id = state.tabs.find_by_path(path);
            if let Some(entry) = id.and_then(|id| state.tabs.get_mut(id)) {
                entry.autosave.cancel_all();
            }
            id
        };

        let _guard = self.lock_path(path).await;
        self.inner.drafts.remove_draft(path).await?;
        self.emit(SyncEvent::DraftRemoved { path: path.clone() });

        if let Some(id) = tab {
            let adopted_external = self.update_tab(id, |t| {
                let external = match &t.status {
                    TabStatus::ConflictPending { external } => Some(external.clone()),
                    _ => None,
                };
                let adopted = external.is_some();
                if adopted {
                    t.baseline = external;
                }
                t.buffer = t.baseline.clone().unwrap_or_default();
                t.status.reloaded();
                adopted
            });
            if adopted_external == Some(true) {
                if let Some(file) = path.as_file() {
                    self.inner.snapshot.forget(file);
                }
            }
        }

        info!("Discarded changes to {}", path);
        Ok(())
    }

    // ---- Reconciliation ----

    /// Handle a change notification from the watch service.
    pub async fn handle_file_changed(&self, path: &Path) -> Reconciliation {
        let active = {
            let state = self.state();
            state
                .tabs
                .active_entry()
                .filter(|t| t.path.as_file() == Some(path))
                .map(|t| (t.id, t.path.clone()))
        };
        let Some((id, doc)) = active else {
            debug!("Ignoring change to inactive {}", path.display());
            return Reconciliation::NotActive;
        };

        if policy::screen(&self.inner.suppressor, path).is_some() {
            debug!("Suppressed self-write echo for {}", doc);
            return Reconciliation::Suppressed;
        }

        let _guard = self.lock_path(&doc).await;

        let disk = match self.inner.fs.read_text(path).await {
            Ok(disk) => disk,
            Err(e) => {
                warn!("Failed to read {}: {}", doc, e);
                self.emit(SyncEvent::ReadFailed {
                    path: doc,
                    error: e.to_string(),
                });
                return Reconciliation::ReadFailed;
            }
        };

        let last_written = self.inner.snapshot.get(path);
        let decision = self.update_tab(id, |t| {
            if t.path != doc {
                return None;
            }
            let decision = policy::decide(&Observation {
                disk: &disk,
                last_written: last_written.as_deref(),
                baseline: t.baseline.as_deref(),
                status: &t.status,
                mode: t.mode,
                has_local_edits: t.has_local_edits(),
            });
            match decision {
                Decision::Reload => {
                    t.autosave.cancel_all();
                    t.buffer = disk.clone();
                    t.baseline = Some(disk.clone());
                    t.status.reloaded();
                }
                Decision::Prompt => t.status.raise_conflict(disk.clone()),
                _ => {}
            }
            Some(decision)
        });

        match decision.flatten() {
            None => Reconciliation::NotActive,
            Some(Decision::Suppress) => Reconciliation::Suppressed,
            Some(Decision::Echo) => {
                debug!("Dropped stale echo for {}", doc);
                Reconciliation::Echo
            }
            Some(Decision::Unchanged) => {
                debug!("No change on disk for {}", doc);
                Reconciliation::Unchanged
            }
            Some(Decision::AlreadyPrompted) => {
                debug!("Prompt already pending for {}", doc);
                Reconciliation::AlreadyPrompted
            }
            Some(Decision::Reload) => {
                self.inner.snapshot.forget(path);
                self.remove_draft_logged(&doc).await;
                info!("Reloaded {} from disk", doc);
                self.emit(SyncEvent::Reloaded {
                    tab_id: id,
                    path: doc,
                    content: disk,
                });
                Reconciliation::Reloaded
            }
            Some(Decision::Prompt) => {
                info!("External change to {} with local edits", doc);
                self.emit(SyncEvent::ExternalChangePrompt {
                    tab_id: id,
                    path: doc,
                });
                Reconciliation::Prompted
            }
        }
    }

    /// Answer the external change prompt for `path`.
    pub async fn resolve_prompt(&self, path: &DocPath, resolution: PromptResolution) -> Result<()> {
        let id = {
            let state = self.state();
            state
                .tabs
                .find_by_path(path)
                .filter(|id| {
                    state
                        .tabs
                        .get(*id)
                        .is_some_and(|t| t.status.is_conflict_pending())
                })
                .ok_or_else(|| EngineError::NoPendingPrompt(path.clone()))?
        };

        match resolution {
            PromptResolution::Reload => self.reload_tab(id).await?,
            PromptResolution::KeepCurrent | PromptResolution::Dismiss => {
                self.keep_current(id, path).await?
            }
        }

        info!("Resolved prompt for {}: {:?}", path, resolution);
        self.emit(SyncEvent::PromptResolved {
            tab_id: id,
            path: path.clone(),
            resolution,
        });
        Ok(())
    }

    /// Replace a tab's buffer with fresh disk content, dropping local edits.
    ///
    /// The draft is removed before the tab turns clean. If removal fails the
    /// tab keeps its buffer and status and the error is returned.
    pub async fn reload_tab(&self, id: TabId) -> Result<()> {
        let (path, mode) = {
            let mut state = self.state();
            let entry = state.tabs.get_mut(id).ok_or(EngineError::UnknownTab(id))?;
            entry.autosave.cancel_all();
            (entry.path.clone(), entry.mode)
        };
        let Some(file) = path.as_file().map(Path::to_path_buf) else {
            return Ok(());
        };

        let _guard = self.lock_path(&path).await;

        let disk = match self.inner.fs.read_text(&file).await {
            Ok(disk) => disk,
            Err(e) => {
                warn!("Failed to read {}: {}", path, e);
                self.emit(SyncEvent::ReadFailed {
                    path,
                    error: e.to_string(),
                });
                return Err(e.into());
            }
        };

        if mode == TabMode::Editable {
            if let Err(e) = self.inner.drafts.remove_draft(&path).await {
                warn!("Failed to remove draft for {}, keeping local edits: {}", path, e);
                return Err(e.into());
            }
            self.emit(SyncEvent::DraftRemoved { path: path.clone() });
        }

        self.inner.snapshot.forget(&file);
        self.update_tab(id, |t| {
            t.buffer = disk.clone();
            t.baseline = Some(disk.clone());
            t.status.reloaded();
        });

        info!("Reloaded {} from disk", path);
        self.emit(SyncEvent::Reloaded {
            tab_id: id,
            path,
            content: disk,
        });
        Ok(())
    }

    async fn keep_current(&self, id: TabId, path: &DocPath) -> Result<()> {
        let _guard = self.lock_path(path).await;
        if let Some(file) = path.as_file() {
            self.inner.snapshot.forget(file);
        }

        let kept = self.update_tab(id, |t| {
            let external = t.status.keep_current()?;
            t.baseline = Some(external);
            if t.mode == TabMode::ReadOnly {
                t.status = TabStatus::Clean;
            }
            Some(t.mode)
        });

        match kept.flatten() {
            Some(TabMode::Editable) => {
                self.write_draft_locked(id, path).await;
                Ok(())
            }
            Some(TabMode::ReadOnly) => Ok(()),
            None => Err(EngineError::NoPendingPrompt(path.clone())),
        }
    }

    // ---- Settings and teardown ----

    /// Apply new settings. Delays affect timers armed from now on.
    pub fn update_settings(&self, settings: SyncSettings) {
        self.inner
            .suppressor
            .set_window(settings.suppression_window());
        let mut state = self.state();
        for entry in state.tabs.iter_mut() {
            entry.autosave.apply_settings(&settings);
        }
        state.settings = settings;
        debug!("Settings updated: {:?}", state.settings);
    }

    /// Flush pending drafts, cancel disk timers and release the watcher.
    pub async fn shutdown(&self) {
        let mut dropped_disk_writes = 0;
        let pending: Vec<TabId> = {
            let mut state = self.state();
            state
                .tabs
                .iter_mut()
                .filter_map(|entry| {
                    let had_draft_timer = entry.autosave.has_pending_draft();
                    if entry.autosave.has_pending_disk() {
                        dropped_disk_writes += 1;
                    }
                    entry.autosave.cancel_all();
                    (entry.mode == TabMode::Editable
                        && (had_draft_timer || entry.has_local_edits()))
                    .then_some(entry.id)
                })
                .collect()
        };

        futures::future::join_all(pending.iter().map(|id| self.write_draft_for_tab(*id))).await;

        if let Err(e) = self.inner.watcher.stop_watching().await {
            warn!("Failed to stop watcher: {}", e);
        }
        info!(
            "Engine shut down, flushed {} drafts, cancelled {} pending disk writes",
            pending.len(),
            dropped_disk_writes
        );
    }

    // ---- Internals ----

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Apply `f` to a tab and emit `DirtyChanged` if the dirty flag flipped.
    /// Returns None if the tab is gone.
    fn update_tab<R>(&self, id: TabId, f: impl FnOnce(&mut TabEntry) -> R) -> Option<R> {
        let (result, changed) = {
            let mut state = self.state();
            let entry = state.tabs.get_mut(id)?;
            let before = entry.is_dirty();
            let result = f(entry);
            let after = entry.is_dirty();
            (result, (before != after).then_some(after))
        };
        if let Some(dirty) = changed {
            self.emit(SyncEvent::DirtyChanged { tab_id: id, dirty });
        }
        Some(result)
    }

    async fn lock_path(&self, path: &DocPath) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self
                .inner
                .write_locks
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            Arc::clone(locks.entry(path.clone()).or_default())
        };
        lock.lock_owned().await
    }

    /// Lock two paths in a fixed order.
    async fn lock_paths(&self, a: &DocPath, b: &DocPath) -> (OwnedMutexGuard<()>, OwnedMutexGuard<()>) {
        if a <= b {
            let first = self.lock_path(a).await;
            (first, self.lock_path(b).await)
        } else {
            let first = self.lock_path(b).await;
            (self.lock_path(a).await, first)
        }
    }

    fn prune_write_locks(&self) {
        let state = self.state();
        let mut locks = self
            .inner
            .write_locks
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        locks.retain(|path, lock| Arc::strong_count(lock) > 1 || state.tabs.contains_path(path));
    }

    /// Bind the watcher to the active tab, or unbind it.
    async fn rebind(&self) {
        let mut target = None;
        let result = self
            .inner
            .watcher
            .rebind_with(|| {
                target = self
                    .state()
                    .tabs
                    .active_entry()
                    .and_then(|t| t.path.as_file().map(Path::to_path_buf));
                target.clone()
            })
            .await;

        if let Err(e) = result {
            let path = match (&e, target) {
                (WatchError::Start { path, .. }, _) => DocPath::file(path),
                (_, Some(target)) => DocPath::File(target),
                (_, None) => {
                    warn!("Watcher error: {}", e);
                    return;
                }
            };
            warn!("Change detection disabled for {}: {}", path, e);
            self.emit(SyncEvent::WatchFailed {
                path,
                error: e.to_string(),
            });
        }
    }

    async fn remove_draft_logged(&self, path: &DocPath) {
        match self.inner.drafts.remove_draft(path).await {
            Ok(()) => self.emit(SyncEvent::DraftRemoved { path: path.clone() }),
            Err(e) => warn!("Failed to remove draft for {}: {}", path, e),
        }
    }

    async fn write_draft_for_tab(&self, id: TabId) {
        let path = match self.state().tabs.get(id) {
            Some(t) if t.mode == TabMode::Editable => t.path.clone(),
            _ => return,
        };
        let _guard = self.lock_path(&path).await;
        self.write_draft_locked(id, &path).await;
    }

    /// Bring the draft in line with the tab's latest buffer. Caller holds the
    /// path's write lock.
    async fn write_draft_locked(&self, id: TabId, path: &DocPath) {
        let snapshot = {
            let state = self.state();
            state
                .tabs
                .get(id)
                .filter(|t| t.path == *path)
                .map(|t| (t.buffer.clone(), t.buffer_matches_baseline(), t.is_dirty()))
        };
        let Some((buffer, matches_disk, was_dirty)) = snapshot else {
            return;
        };

        if matches_disk {
            if was_dirty {
                self.remove_draft_logged(path).await;
            }
            self.update_tab(id, |t| {
                if t.path == *path {
                    t.status.mark_clean();
                }
            });
            return;
        }

        match self.inner.drafts.save_draft(path, &buffer).await {
            Ok(()) => {
                debug!("Saved draft for {}", path);
                self.emit(SyncEvent::DraftSaved { path: path.clone() });
            }
            // The edit is still not on disk, so the tab is dirty regardless.
            Err(e) => warn!("Failed to save draft for {}: {}", path, e),
        }
        self.update_tab(id, |t| {
            if t.path == *path {
                t.status.mark_dirty();
            }
        });
    }

    async fn write_to_disk(&self, id: TabId) {
        let path = {
            let state = self.state();
            if !state.settings.auto_save {
                return;
            }
            match state.tabs.get(id) {
                Some(t) if t.mode == TabMode::Editable && !t.path.is_untitled() => t.path.clone(),
                _ => return,
            }
        };
        let Some(file) = path.as_file().map(Path::to_path_buf) else {
            return;
        };

        let _guard = self.lock_path(&path).await;

        let content = self.update_tab(id, |t| {
            if t.path != path || t.status.is_conflict_pending() {
                return None;
            }
            if t.buffer_matches_baseline() && !t.status.is_dirty() {
                return None;
            }
            t.status.begin_save();
            Some(t.buffer.clone())
        });

        if let Some(content) = content.flatten() {
            // Failures are reported through events; nothing to propagate.
            let _ = self.commit_locked(Some(id), &path, &file, content).await;
        }
    }

    /// Write `content` to disk and settle draft and status. Caller holds the
    /// path's write lock and has called `begin_save` on the tab.
    async fn commit_locked(
        &self,
        tab: Option<TabId>,
        path: &DocPath,
        file: &Path,
        content: String,
    ) -> Result<()> {
        self.inner.suppressor.open(file);

        if let Err(e) = self.inner.fs.write_text(file, &content).await {
            if let Some(id) = tab {
                self.update_tab(id, |t| t.status.save_failed());
            }
            warn!("Failed to write {}: {}", path, e);
            self.emit(SyncEvent::WriteFailed {
                path: path.clone(),
                error: e.to_string(),
            });
            return Err(e.into());
        }
        self.inner.snapshot.record(file, &content);

        let settled = match tab {
            Some(id) => self
                .update_tab(id, |t| {
                    if t.path != *path {
                        return false;
                    }
                    t.baseline = Some(content.clone());
                    t.buffer == content
                })
                .unwrap_or(false),
            None => true,
        };

        if settled {
            self.remove_draft_logged(path).await;
            if let Some(id) = tab {
                self.update_tab(id, |t| t.status.save_succeeded());
            }
        } else if let Some(id) = tab {
            self.update_tab(id, |t| t.status.save_superseded());
        }

        info!("Saved {}", path);
        self.emit(SyncEvent::Saved { path: path.clone() });
        Ok(())
    }
}

#[async_trait]
impl AutosaveSink for SynchronizationEngine {
    async fn flush_draft(&self, tab: TabId) {
        self.write_draft_for_tab(tab).await;
    }

    async fn flush_disk(&self, tab: TabId) {
        self.write_to_disk(tab).await;
    }
}
