//! FileSystem trait abstraction for the authoritative on-disk documents.
//!
//! Implementations:
//! - `InMemoryFs` - For testing
//! - `NativeFs` (in docsync-daemon) - Uses tokio::fs
//!
//! The engine only ever reads and writes whole UTF-8 documents. Atomicity of a
//! single write against a concurrent crash is the implementation's concern.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FsError {
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("IO error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, FsError>;

/// Platform-independent access to document files.
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Read a whole document as text.
    async fn read_text(&self, path: &Path) -> Result<String>;

    /// Replace a document's content.
    async fn write_text(&self, path: &Path, content: &str) -> Result<()>;
}

/// In-memory filesystem for testing.
///
/// Records every successful write so tests can assert how many writes the
/// engine issued, and can be told to fail reads or writes for a path.
#[derive(Default)]
pub struct InMemoryFs {
    files: RwLock<HashMap<PathBuf, String>>,
    writes: RwLock<Vec<(PathBuf, String)>>,
    failing_writes: RwLock<HashSet<PathBuf>>,
    failing_reads: RwLock<HashSet<PathBuf>>,
}

impl InMemoryFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Change a file behind the engine's back, as another process would.
    pub fn set_external(&self, path: impl Into<PathBuf>, content: &str) {
        self.files
            .write()
            .unwrap()
            .insert(path.into(), content.to_string());
    }

    /// Current content of a file, bypassing the write log.
    pub fn contents(&self, path: impl AsRef<Path>) -> Option<String> {
        self.files.read().unwrap().get(path.as_ref()).cloned()
    }

    /// All writes issued through the trait, in order.
    pub fn writes(&self) -> Vec<(PathBuf, String)> {
        self.writes.read().unwrap().clone()
    }

    /// Number of writes issued to one path.
    pub fn write_count(&self, path: impl AsRef<Path>) -> usize {
        let path = path.as_ref();
        self.writes
            .read()
            .unwrap()
            .iter()
            .filter(|(p, _)| p == path)
            .count()
    }

    /// Make writes to `path` fail with an IO error until cleared.
    pub fn fail_writes(&self, path: impl Into<PathBuf>, fail: bool) {
        let mut failing = self.failing_writes.write().unwrap();
        let path = path.into();
        if fail {
            failing.insert(path);
        } else {
            failing.remove(&path);
        }
    }

    /// Make reads of `path` fail with a permission error until cleared.
    pub fn fail_reads(&self, path: impl Into<PathBuf>, fail: bool) {
        let mut failing = self.failing_reads.write().unwrap();
        let path = path.into();
        if fail {
            failing.insert(path);
        } else {
            failing.remove(&path);
        }
    }
}

#[async_trait]
impl FileSystem for InMemoryFs {
    async fn read_text(&self, path: &Path) -> Result<String> {
        if self.failing_reads.read().unwrap().contains(path) {
            return Err(FsError::PermissionDenied(path.display().to_string()));
        }
        self.files
            .read()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| FsError::NotFound(path.display().to_string()))
    }

    async fn write_text(&self, path: &Path, content: &str) -> Result<()> {
        if self.failing_writes.read().unwrap().contains(path) {
            return Err(FsError::Io(format!("simulated failure for {}", path.display())));
        }
        self.files
            .write()
            .unwrap()
            .insert(path.to_path_buf(), content.to_string());
        self.writes
            .write()
            .unwrap()
            .push((path.to_path_buf(), content.to_string()));
        Ok(())
    }
}

// Implement FileSystem for Arc<T> where T: FileSystem
// This lets tests keep a handle on the same filesystem the engine uses.
#[async_trait]
impl<T: FileSystem + ?Sized> FileSystem for std::sync::Arc<T> {
    async fn read_text(&self, path: &Path) -> Result<String> {
        (**self).read_text(path).await
    }

    async fn write_text(&self, path: &Path, content: &str) -> Result<()> {
        (**self).write_text(path, content).await
    }
}
