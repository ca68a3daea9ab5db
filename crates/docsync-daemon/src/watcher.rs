//! Single-file change watching with notify-debouncer-mini.
//!
//! Editors commonly save through a temp file and rename, which replaces the
//! inode a file watch would be attached to. The parent directory is watched
//! non-recursively instead and events are filtered down to the bound file.

use async_trait::async_trait;
use docsync_core::watch::{Result, WatchError, WatchService};
use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebouncedEvent, Debouncer};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error};

/// Default debounce period for raw filesystem events.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(200);

struct Binding {
    path: PathBuf,
    /// Debouncer handle (must keep alive)
    _debouncer: Debouncer<notify::RecommendedWatcher>,
}

/// `WatchService` backed by the OS watcher. Change notifications are sent as
/// the path that was passed to `start_watching`.
pub struct NotifyWatchService {
    debounce: Duration,
    tx: mpsc::UnboundedSender<PathBuf>,
    binding: Mutex<Option<Binding>>,
}

impl NotifyWatchService {
    /// Create the service and the receiver its notifications arrive on.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PathBuf>) {
        Self::with_debounce(DEFAULT_DEBOUNCE)
    }

    pub fn with_debounce(debounce: Duration) -> (Self, mpsc::UnboundedReceiver<PathBuf>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let service = Self {
            debounce,
            tx,
            binding: Mutex::new(None),
        };
        (service, rx)
    }

    /// Path currently watched, as given to `start_watching`.
    pub fn watching(&self) -> Option<PathBuf> {
        self.lock().as_ref().map(|b| b.path.clone())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Binding>> {
        self.binding.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn start_error(path: &Path, reason: impl ToString) -> WatchError {
        WatchError::Start {
            path: path.display().to_string(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl WatchService for NotifyWatchService {
    async fn start_watching(&self, path: &Path) -> Result<()> {
        let file_name = path
            .file_name()
            .ok_or_else(|| Self::start_error(path, "not a file path"))?;
        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };

        // Canonicalize the path to resolve symlinks. On macOS, /var/folders/...
        // is actually /private/var/folders/..., and FSEvents needs the real path.
        let parent = parent.canonicalize().unwrap_or(parent);
        let target = parent.join(file_name);

        let original = path.to_path_buf();
        let tx = self.tx.clone();
        let mut debouncer = new_debouncer(
            self.debounce,
            move |result: std::result::Result<Vec<DebouncedEvent>, notify::Error>| match result {
                Ok(events) => {
                    if events.iter().any(|event| event.path == target) {
                        debug!("File event: {}", original.display());
                        // Receiver dropped means the daemon is shutting down.
                        let _ = tx.send(original.clone());
                    }
                }
                Err(e) => {
                    error!("File watcher error: {}", e);
                }
            },
        )
        .map_err(|e| Self::start_error(path, e))?;

        debouncer
            .watcher()
            .watch(&parent, RecursiveMode::NonRecursive)
            .map_err(|e| Self::start_error(path, e))?;

        // Replacing the binding drops the previous debouncer, which stops it.
        *self.lock() = Some(Binding {
            path: path.to_path_buf(),
            _debouncer: debouncer,
        });
        Ok(())
    }

    async fn stop_watching(&self) -> Result<()> {
        self.lock().take();
        Ok(())
    }
}
