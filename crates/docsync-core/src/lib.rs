//! docsync-core: local-first document synchronization for a desktop editor.
//!
//! This crate provides:
//! - A draft cache holding unsaved edits across restarts
//! - Debounced autosave of drafts and files
//! - Reconciliation of external file changes (silent reload or prompt)
//! - Tab lifecycle with per-tab synchronization status
//! - FileSystem, DraftStore and WatchService trait abstractions

pub mod autosave;
pub mod debounce;
pub mod draft;
pub mod engine;
pub mod events;
pub mod fs;
pub mod path;
pub mod policy;
pub mod settings;
pub mod snapshot;
pub mod status;
pub mod suppress;
pub mod tabs;
pub mod watch;

pub use autosave::{AutosaveController, AutosaveSink};
pub use draft::{Draft, DraftError, DraftStore, InMemoryDraftStore};
pub use engine::{
    CloseDecision, CloseOutcome, EngineError, OpenOutcome, Reconciliation, SaveOutcome,
    SynchronizationEngine,
};
pub use events::{EventBus, PromptResolution, Subscription, SyncEvent};
pub use fs::{FileSystem, FsError, InMemoryFs};
pub use path::{DocPath, UNTITLED_PREFIX};
pub use settings::SyncSettings;
pub use snapshot::LastWrittenSnapshot;
pub use status::TabStatus;
pub use suppress::SelfWriteSuppressor;
pub use tabs::{Tab, TabId, TabMode};
pub use watch::{ChangeWatcher, InMemoryWatchService, WatchCall, WatchError, WatchService};
