//! Event infrastructure for the synchronization engine.
//!
//! `SyncEvent` is how the engine talks to the UI layer: prompts, reloads and
//! non-blocking failure notifications. `EventBus` fans events out to
//! subscribers; callbacks run synchronously on the emitting task and must
//! not block.

use crate::path::DocPath;
use crate::tabs::TabId;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};

/// How the user answered an external-change prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PromptResolution {
    /// Discard local edits and load the disk content.
    Reload,
    /// Keep local edits; drop further notifications for this change.
    KeepCurrent,
    /// Closed without choosing. Same effect as `KeepCurrent`.
    Dismiss,
}

/// Events emitted by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SyncEvent {
    /// A draft was written to the draft cache.
    DraftSaved { path: DocPath },
    /// A draft was removed (committed, discarded, or superseded by disk).
    DraftRemoved { path: DocPath },
    /// The tab's dirty flag flipped.
    DirtyChanged {
        #[serde(rename = "tabId")]
        tab_id: TabId,
        dirty: bool,
    },
    /// The app wrote a document to disk.
    Saved { path: DocPath },
    /// A disk write failed. The draft is intact; nothing is retried.
    WriteFailed { path: DocPath, error: String },
    /// Reading a document from disk failed.
    ReadFailed { path: DocPath, error: String },
    /// A tab's buffer was replaced with disk content.
    Reloaded {
        #[serde(rename = "tabId")]
        tab_id: TabId,
        path: DocPath,
        content: String,
    },
    /// The file changed on disk while the tab had local edits (or is a
    /// read-only surface). The user must pick a `PromptResolution`.
    ExternalChangePrompt {
        #[serde(rename = "tabId")]
        tab_id: TabId,
        path: DocPath,
    },
    /// A prompt was answered.
    PromptResolved {
        #[serde(rename = "tabId")]
        tab_id: TabId,
        path: DocPath,
        resolution: PromptResolution,
    },
    /// The change watcher could not be bound. External change detection is
    /// off for this document.
    WatchFailed { path: DocPath, error: String },
}

/// Subscription handle that unsubscribes automatically when dropped.
///
/// Follows the disposer pattern: hold this value to keep receiving events,
/// drop it (or let it go out of scope) to unsubscribe.
pub struct Subscription {
    bus: Weak<EventBus>,
    id: usize,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}

type Callback = Arc<dyn Fn(SyncEvent) + Send + Sync>;

/// Event bus for publishing sync events to subscribers.
///
/// Wrap in `Arc` to enable subscriptions.
pub struct EventBus {
    callbacks: RwLock<Vec<(usize, Callback)>>,
    next_id: AtomicUsize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self {
            callbacks: RwLock::new(Vec::new()),
            next_id: AtomicUsize::new(0),
        }
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events. Returns `Subscription` that unsubscribes on drop.
    pub fn subscribe(
        self: &Arc<Self>,
        callback: impl Fn(SyncEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(callback)));
        Subscription {
            bus: Arc::downgrade(self),
            id,
        }
    }

    fn unsubscribe(&self, id: usize) {
        // Use try_write to avoid deadlock if Drop runs during panic unwinding
        // while a read lock is held (e.g., during emit).
        if let Ok(mut guard) = self.callbacks.try_write() {
            guard.retain(|(i, _)| *i != id);
        }
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: SyncEvent) {
        // Clone the callback list so a callback may subscribe or call back
        // into the engine without deadlocking.
        let callbacks: Vec<_> = self
            .callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for callback in callbacks {
            callback(event.clone());
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}
