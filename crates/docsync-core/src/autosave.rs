//! Per-tab debounced autosave.
//!
//! Every edit re-arms two timers fed by the same content stream: a short
//! draft timer that persists the buffer to the draft cache, and an optional
//! disk timer that commits it to the file. Timers carry only the tab id; the
//! sink reads the latest buffer when a timer fires.

use crate::debounce::Debouncer;
use crate::settings::SyncSettings;
use crate::tabs::TabId;
use async_trait::async_trait;
use std::sync::Arc;

/// Receiver of fired autosave timers.
#[async_trait]
pub trait AutosaveSink: Send + Sync {
    /// Persist the tab's current buffer to the draft cache.
    async fn flush_draft(&self, tab: TabId);

    /// Commit the tab's current buffer to disk.
    async fn flush_disk(&self, tab: TabId);
}

pub struct AutosaveController {
    draft: Debouncer,
    disk: Debouncer,
}

impl AutosaveController {
    pub fn new(settings: &SyncSettings) -> Self {
        Self {
            draft: Debouncer::new(settings.draft_delay()),
            disk: Debouncer::new(settings.auto_save_delay()),
        }
    }

    /// Restart the timers after an edit. The disk timer is only armed when
    /// `to_disk` is set; otherwise a previously armed one is dropped.
    pub fn content_changed(&mut self, sink: Arc<dyn AutosaveSink>, tab: TabId, to_disk: bool) {
        if to_disk {
            let disk_sink = Arc::clone(&sink);
            self.disk
                .schedule(move || async move { disk_sink.flush_disk(tab).await });
        } else {
            self.disk.cancel();
        }

        self.draft
            .schedule(move || async move { sink.flush_draft(tab).await });
    }

    /// New delays apply to timers armed from now on. Turning auto-save off
    /// drops a pending disk commit.
    pub fn apply_settings(&mut self, settings: &SyncSettings) {
        self.draft.set_delay(settings.draft_delay());
        self.disk.set_delay(settings.auto_save_delay());
        if !settings.auto_save {
            self.disk.cancel();
        }
    }

    pub fn cancel_all(&mut self) {
        self.draft.cancel();
        self.disk.cancel();
    }

    pub fn has_pending_draft(&self) -> bool {
        self.draft.is_pending()
    }

    pub fn has_pending_disk(&self) -> bool {
        self.disk.is_pending()
    }
}
