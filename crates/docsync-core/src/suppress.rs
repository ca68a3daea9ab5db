//! Self-write suppression for watcher notifications.
//!
//! Before the engine writes a file it opens a window for that path. Any
//! notification for the path that arrives while the window is open is treated
//! as the echo of our own write. Notifications carry no payload to match
//! against, so a window is never closed by an event: it stays open until its
//! deadline, and every check purges expired windows. A genuine external edit
//! can therefore only be masked for at most one window length, and the
//! content snapshot catches echoes that arrive late.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Default window length in milliseconds.
pub const DEFAULT_SUPPRESSION_WINDOW_MS: u64 = 1000;

pub struct SelfWriteSuppressor {
    /// Path -> window deadline
    windows: Mutex<HashMap<PathBuf, Instant>>,
    window: Mutex<Duration>,
}

impl SelfWriteSuppressor {
    pub fn new() -> Self {
        Self::with_window(Duration::from_millis(DEFAULT_SUPPRESSION_WINDOW_MS))
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            window: Mutex::new(window),
        }
    }

    /// Change the length of windows opened from now on.
    pub fn set_window(&self, window: Duration) {
        *self.window.lock().unwrap_or_else(|e| e.into_inner()) = window;
    }

    /// Open (or extend) the window for `path`. Call immediately before writing.
    pub fn open(&self, path: &Path) {
        let deadline = Instant::now() + *self.window.lock().unwrap_or_else(|e| e.into_inner());
        self.windows
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path.to_path_buf(), deadline);
    }

    /// True while a window for `path` is open. Does not consume the window:
    /// duplicate echoes of the same write are all suppressed.
    pub fn is_open(&self, path: &Path) -> bool {
        let now = Instant::now();
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        windows.retain(|_, deadline| now < *deadline);
        windows.contains_key(path)
    }
}

impl Default for SelfWriteSuppressor {
    fn default() -> Self {
        Self::new()
    }
}
