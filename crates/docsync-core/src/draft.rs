//! Draft cache: persistent per-path scratch buffers for unsaved edits.
//!
//! The existence of a draft is the durable signal that a document has edits
//! beyond what is on disk. The cache is a convenience, not a write-ahead log:
//! callers log failures and carry on with in-memory content.

use crate::path::DocPath;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::RwLock;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DraftError {
    #[error("Draft storage error: {0}")]
    Storage(String),

    #[error("Draft serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, DraftError>;

/// A cached, not yet committed version of a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Draft {
    pub path: DocPath,
    pub content: String,
    /// When the draft was last written, in milliseconds since Unix epoch.
    pub timestamp: u64,
}

impl Draft {
    pub fn new(path: DocPath, content: impl Into<String>) -> Self {
        Self {
            path,
            content: content.into(),
            timestamp: now_millis(),
        }
    }
}

/// Milliseconds since Unix epoch.
pub fn now_millis() -> u64 {
    web_time::SystemTime::now()
        .duration_since(web_time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Keyed store of drafts. Last write wins.
#[async_trait]
pub trait DraftStore: Send + Sync {
    /// Get the draft for a path, if any.
    async fn get_draft(&self, path: &DocPath) -> Result<Option<Draft>>;

    /// Create or overwrite the draft for a path.
    async fn save_draft(&self, path: &DocPath, content: &str) -> Result<()>;

    /// Remove the draft for a path. Removing a missing draft is not an error.
    async fn remove_draft(&self, path: &DocPath) -> Result<()>;

    /// Move a draft to a new key in one step. No-op when `old` has no draft.
    async fn rename_draft(&self, old: &DocPath, new: &DocPath) -> Result<()>;

    /// All drafts currently held, ordered by key.
    async fn list_drafts(&self) -> Result<Vec<Draft>>;
}

/// In-memory draft store for testing and for hosts without persistence.
#[derive(Default)]
pub struct InMemoryDraftStore {
    drafts: RwLock<BTreeMap<DocPath, Draft>>,
    failing: RwLock<bool>,
}

impl InMemoryDraftStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail until cleared.
    pub fn set_failing(&self, failing: bool) {
        *self.failing.write().unwrap() = failing;
    }

    fn check(&self) -> Result<()> {
        if *self.failing.read().unwrap() {
            Err(DraftError::Storage("simulated failure".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DraftStore for InMemoryDraftStore {
    async fn get_draft(&self, path: &DocPath) -> Result<Option<Draft>> {
        self.check()?;
        Ok(self.drafts.read().unwrap().get(path).cloned())
    }

    async fn save_draft(&self, path: &DocPath, content: &str) -> Result<()> {
        self.check()?;
        self.drafts
            .write()
            .unwrap()
            .insert(path.clone(), Draft::new(path.clone(), content));
        Ok(())
    }

    async fn remove_draft(&self, path: &DocPath) -> Result<()> {
        self.check()?;
        self.drafts.write().unwrap().remove(path);
        Ok(())
    }

    async fn rename_draft(&self, old: &DocPath, new: &DocPath) -> Result<()> {
        self.check()?;
        // Single write lock: readers never observe the draft under both keys
        // or under neither.
        let mut drafts = self.drafts.write().unwrap();
        if let Some(mut draft) = drafts.remove(old) {
            draft.path = new.clone();
            drafts.insert(new.clone(), draft);
        }
        Ok(())
    }

    async fn list_drafts(&self) -> Result<Vec<Draft>> {
        self.check()?;
        Ok(self.drafts.read().unwrap().values().cloned().collect())
    }
}

#[async_trait]
impl<T: DraftStore + ?Sized> DraftStore for std::sync::Arc<T> {
    async fn get_draft(&self, path: &DocPath) -> Result<Option<Draft>> {
        (**self).get_draft(path).await
    }

    async fn save_draft(&self, path: &DocPath, content: &str) -> Result<()> {
        (**self).save_draft(path, content).await
    }

    async fn remove_draft(&self, path: &DocPath) -> Result<()> {
        (**self).remove_draft(path).await
    }

    async fn rename_draft(&self, old: &DocPath, new: &DocPath) -> Result<()> {
        (**self).rename_draft(old, new).await
    }

    async fn list_drafts(&self) -> Result<Vec<Draft>> {
        (**self).list_drafts().await
    }
}
