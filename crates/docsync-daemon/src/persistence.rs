//! Persistence for the draft cache.
//!
//! Drafts are stored as one JSON document, `<state-dir>/drafts.json`:
//!
//! ```json
//! { "drafts": { "/notes/a.md": { "content": "...", "timestamp": 1700000000000 } } }
//! ```
//!
//! The document is kept in memory and rewritten through a temp file plus
//! rename on every change, so a crash never leaves it half-written.

use anyhow::Context;
use async_trait::async_trait;
use docsync_core::draft::{now_millis, Draft, DraftError, DraftStore, Result};
use docsync_core::DocPath;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// File name of the draft cache inside the state directory.
pub const DRAFTS_FILE: &str = "drafts.json";

/// One persisted draft.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersistedDraft {
    pub content: String,
    /// Last write, unix timestamp ms
    pub timestamp: u64,
}

/// All persisted drafts, keyed by document path string.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PersistedDrafts {
    pub drafts: BTreeMap<String, PersistedDraft>,
}

/// `DraftStore` persisted to a JSON file.
pub struct JsonDraftStore {
    /// Path to the storage file.
    path: PathBuf,
    /// In-memory cache; the lock also serializes file rewrites.
    drafts: Mutex<PersistedDrafts>,
}

impl JsonDraftStore {
    /// Open the store at `<state_dir>/drafts.json`.
    pub async fn open_in(state_dir: &Path) -> anyhow::Result<Self> {
        Self::open(state_dir.join(DRAFTS_FILE)).await
    }

    /// Open the store at `path`. A missing file starts empty; a corrupt one
    /// is logged and replaced on the next write.
    pub async fn open(path: PathBuf) -> anyhow::Result<Self> {
        let drafts = match fs::read_to_string(&path).await {
            Ok(contents) => match serde_json::from_str::<PersistedDrafts>(&contents) {
                Ok(drafts) => drafts,
                Err(e) => {
                    warn!("Ignoring corrupt draft cache {}: {}", path.display(), e);
                    PersistedDrafts::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => PersistedDrafts::default(),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read draft cache {}", path.display()));
            }
        };

        debug!(
            "Loaded {} draft(s) from {}",
            drafts.drafts.len(),
            path.display()
        );
        Ok(Self {
            path,
            drafts: Mutex::new(drafts),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the whole cache to disk.
    async fn persist(&self, drafts: &PersistedDrafts) -> Result<()> {
        let contents = serde_json::to_string_pretty(drafts)
            .map_err(|e| DraftError::Serialization(e.to_string()))?;

        // Ensure directory exists
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| DraftError::Storage(e.to_string()))?;
        }

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, contents)
            .await
            .map_err(|e| DraftError::Storage(e.to_string()))?;
        fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| DraftError::Storage(e.to_string()))
    }
}

fn to_draft(key: &str, persisted: &PersistedDraft) -> Draft {
    Draft {
        path: key.parse().unwrap_or_else(|never| match never {}),
        content: persisted.content.clone(),
        timestamp: persisted.timestamp,
    }
}

#[async_trait]
impl DraftStore for JsonDraftStore {
    async fn get_draft(&self, path: &DocPath) -> Result<Option<Draft>> {
        let key = path.key();
        let drafts = self.drafts.lock().await;
        Ok(drafts.drafts.get(&key).map(|d| to_draft(&key, d)))
    }

    async fn save_draft(&self, path: &DocPath, content: &str) -> Result<()> {
        let mut drafts = self.drafts.lock().await;
        drafts.drafts.insert(
            path.key(),
            PersistedDraft {
                content: content.to_string(),
                timestamp: now_millis(),
            },
        );
        self.persist(&drafts).await
    }

    async fn remove_draft(&self, path: &DocPath) -> Result<()> {
        let mut drafts = self.drafts.lock().await;
        if drafts.drafts.remove(&path.key()).is_none() {
            return Ok(());
        }
        self.persist(&drafts).await
    }

    async fn rename_draft(&self, old: &DocPath, new: &DocPath) -> Result<()> {
        let mut drafts = self.drafts.lock().await;
        let Some(draft) = drafts.drafts.remove(&old.key()) else {
            return Ok(());
        };
        drafts.drafts.insert(new.key(), draft);
        self.persist(&drafts).await
    }

    async fn list_drafts(&self) -> Result<Vec<Draft>> {
        let drafts = self.drafts.lock().await;
        Ok(drafts
            .drafts
            .iter()
            .map(|(key, d)| to_draft(key, d))
            .collect())
    }
}
