//! Record of what the app itself last wrote to each path.
//!
//! Watcher notifications carry no payload, so the only way to tell our own
//! write from a genuine external edit once the suppression window has closed
//! is to compare the disk content with what we wrote.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Default)]
pub struct LastWrittenSnapshot {
    written: Mutex<HashMap<PathBuf, String>>,
}

impl LastWrittenSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful app-initiated write.
    pub fn record(&self, path: &Path, content: &str) {
        self.written
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path.to_path_buf(), content.to_string());
    }

    pub fn get(&self, path: &Path) -> Option<String> {
        self.written.lock().unwrap_or_else(|e| e.into_inner()).get(path).cloned()
    }

    /// Move an entry when the file is renamed.
    pub fn rename(&self, old: &Path, new: &Path) {
        let mut written = self.written.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(content) = written.remove(old) {
            written.insert(new.to_path_buf(), content);
        }
    }

    /// Drop the entry once the engine adopts disk content it did not write.
    pub fn forget(&self, path: &Path) {
        self.written.lock().unwrap_or_else(|e| e.into_inner()).remove(path);
    }
}
