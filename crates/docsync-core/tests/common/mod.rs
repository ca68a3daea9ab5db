//! Shared harness for engine scenario tests.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use docsync_core::{
    DocPath, DraftStore, InMemoryDraftStore, InMemoryFs, InMemoryWatchService, Subscription,
    SyncEvent, SyncSettings, SynchronizationEngine, TabId,
};

pub const A: &str = "/doc/a.md";
pub const B: &str = "/doc/b.md";

pub struct Harness {
    pub engine: SynchronizationEngine,
    pub fs: Arc<InMemoryFs>,
    pub drafts: Arc<InMemoryDraftStore>,
    pub watch: Arc<InMemoryWatchService>,
    events: Arc<Mutex<Vec<SyncEvent>>>,
    _subscription: Subscription,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(SyncSettings::default())
    }

    /// Draft timer only; disk writes happen on explicit save.
    pub fn manual_save() -> Self {
        Self::with_settings(SyncSettings {
            auto_save: false,
            ..SyncSettings::default()
        })
    }

    pub fn with_settings(settings: SyncSettings) -> Self {
        let fs = Arc::new(InMemoryFs::new());
        let drafts = Arc::new(InMemoryDraftStore::new());
        let watch = Arc::new(InMemoryWatchService::new());
        let engine =
            SynchronizationEngine::new(fs.clone(), drafts.clone(), watch.clone(), settings);

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let subscription = engine.subscribe(move |event| {
            sink.lock().unwrap().push(event);
        });

        Self {
            engine,
            fs,
            drafts,
            watch,
            events,
            _subscription: subscription,
        }
    }

    pub fn events(&self) -> Vec<SyncEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn prompt_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, SyncEvent::ExternalChangePrompt { .. }))
            .count()
    }

    pub fn clear_events(&self) {
        self.events.lock().unwrap().clear();
    }

    pub async fn draft(&self, path: &str) -> Option<String> {
        self.drafts
            .get_draft(&doc(path))
            .await
            .unwrap()
            .map(|d| d.content)
    }

    pub fn is_dirty(&self, id: TabId) -> bool {
        self.engine.tab(id).unwrap().dirty
    }

    pub fn content(&self, id: TabId) -> String {
        self.engine.content(id).unwrap()
    }

    pub fn watching(&self) -> Option<PathBuf> {
        self.watch.watching()
    }
}

pub fn doc(path: &str) -> DocPath {
    path.parse().unwrap()
}

pub async fn sleep_ms(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}
