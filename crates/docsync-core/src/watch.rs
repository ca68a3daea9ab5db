//! Binding of the OS change-notification service to the active document.
//!
//! The host's `WatchService` delivers `changed(path)` notifications to a single
//! listener (which forwards them to `SynchronizationEngine::handle_file_changed`).
//! `ChangeWatcher` keeps at most one binding alive and makes rebinding
//! idempotent. Untitled documents are never bound.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WatchError {
    #[error("Cannot watch {path}: {reason}")]
    Start { path: String, reason: String },

    #[error("Failed to stop watching: {0}")]
    Stop(String),
}

pub type Result<T> = std::result::Result<T, WatchError>;

/// OS-level file change subscription for exactly one path at a time.
#[async_trait]
pub trait WatchService: Send + Sync {
    /// Subscribe to changes of `path`, replacing any previous subscription.
    async fn start_watching(&self, path: &Path) -> Result<()>;

    /// Tear down the current subscription.
    async fn stop_watching(&self) -> Result<()>;
}

/// Tracks the single active binding on top of a `WatchService`.
pub struct ChangeWatcher {
    service: Arc<dyn WatchService>,
    /// Serializes rebinds; holds the currently bound path.
    bound: tokio::sync::Mutex<Option<PathBuf>>,
}

impl ChangeWatcher {
    pub fn new(service: Arc<dyn WatchService>) -> Self {
        Self {
            service,
            bound: tokio::sync::Mutex::new(None),
        }
    }

    /// Bind to `path`. No-op if already bound to it; an older binding is torn
    /// down first. On failure the watcher is left unbound.
    pub async fn start_watching(&self, path: &Path) -> Result<()> {
        let mut bound = self.bound.lock().await;
        self.bind_locked(&mut bound, Some(path)).await
    }

    /// Remove the current binding, if any.
    pub async fn stop_watching(&self) -> Result<()> {
        let mut bound = self.bound.lock().await;
        self.bind_locked(&mut bound, None).await
    }

    /// Rebind to whatever `target` resolves to once the rebind lock is held.
    ///
    /// Resolving the target under the lock lets racing tab switches converge
    /// on the latest active tab instead of whichever rebind finished last.
    pub async fn rebind_with<F>(&self, target: F) -> Result<()>
    where
        F: FnOnce() -> Option<PathBuf>,
    {
        let mut bound = self.bound.lock().await;
        let target = target();
        self.bind_locked(&mut bound, target.as_deref()).await
    }

    /// Path currently bound.
    pub async fn bound_path(&self) -> Option<PathBuf> {
        self.bound.lock().await.clone()
    }

    async fn bind_locked(&self, bound: &mut Option<PathBuf>, target: Option<&Path>) -> Result<()> {
        if bound.as_deref() == target {
            return Ok(());
        }

        if let Some(old) = bound.take() {
            debug!("Unwatching {}", old.display());
            if let Err(e) = self.service.stop_watching().await {
                // The old subscription is gone from our point of view either way.
                warn!("Failed to stop watching {}: {}", old.display(), e);
            }
        }

        if let Some(path) = target {
            self.service.start_watching(path).await?;
            debug!("Watching {}", path.display());
            *bound = Some(path.to_path_buf());
        }

        Ok(())
    }
}

/// Calls recorded by `InMemoryWatchService`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchCall {
    Start(PathBuf),
    Stop,
}

/// Watch service for testing: records calls, never emits notifications
/// (tests deliver them to the engine directly).
#[derive(Default)]
pub struct InMemoryWatchService {
    calls: Mutex<Vec<WatchCall>>,
    watching: Mutex<Option<PathBuf>>,
    failing: Mutex<bool>,
}

impl InMemoryWatchService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<WatchCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn watching(&self) -> Option<PathBuf> {
        self.watching.lock().unwrap().clone()
    }

    /// Make `start_watching` fail until cleared.
    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }
}

#[async_trait]
impl WatchService for InMemoryWatchService {
    async fn start_watching(&self, path: &Path) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(WatchCall::Start(path.to_path_buf()));
        if *self.failing.lock().unwrap() {
            return Err(WatchError::Start {
                path: path.display().to_string(),
                reason: "simulated failure".to_string(),
            });
        }
        *self.watching.lock().unwrap() = Some(path.to_path_buf());
        Ok(())
    }

    async fn stop_watching(&self) -> Result<()> {
        self.calls.lock().unwrap().push(WatchCall::Stop);
        *self.watching.lock().unwrap() = None;
        Ok(())
    }
}
