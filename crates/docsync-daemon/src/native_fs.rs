//! Native filesystem implementation using tokio::fs.

use async_trait::async_trait;
use docsync_core::fs::{FileSystem, FsError, Result};
use std::io;
use std::path::Path;
use tokio::fs;

/// Native filesystem for the daemon. Paths are used as given.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeFs;

impl NativeFs {
    pub fn new() -> Self {
        Self
    }
}

fn map_err(path: &Path, e: io::Error) -> FsError {
    match e.kind() {
        io::ErrorKind::NotFound => FsError::NotFound(path.display().to_string()),
        io::ErrorKind::PermissionDenied => FsError::PermissionDenied(path.display().to_string()),
        _ => FsError::Io(format!("{}: {}", path.display(), e)),
    }
}

#[async_trait]
impl FileSystem for NativeFs {
    async fn read_text(&self, path: &Path) -> Result<String> {
        fs::read_to_string(path).await.map_err(|e| map_err(path, e))
    }

    async fn write_text(&self, path: &Path, content: &str) -> Result<()> {
        // Create parent directories if needed
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| map_err(parent, e))?;
        }

        fs::write(path, content).await.map_err(|e| map_err(path, e))
    }
}
