//! docsync-daemon library: native services for the sync engine.
//!
//! This is a thin library layer over the daemon components,
//! allowing integration tests to access internal types.

pub mod commands;
pub mod native_fs;
pub mod persistence;
pub mod settings;
pub mod watcher;

// Re-export key types for convenience
pub use commands::{Command, CommandError};
pub use native_fs::NativeFs;
pub use persistence::JsonDraftStore;
pub use settings::load_settings;
pub use watcher::NotifyWatchService;
