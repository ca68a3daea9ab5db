//! User settings that drive the debounce timers and the suppression window.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Engine settings. Every field has a default so partial settings files
/// deserialize cleanly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Write edits to disk automatically after `auto_save_delay_ms` of quiet.
    pub auto_save: bool,

    /// Disk debounce delay in milliseconds (default: 1 second)
    pub auto_save_delay_ms: u64,

    /// Draft debounce delay in milliseconds (default: 500ms)
    pub draft_delay_ms: u64,

    /// How long notifications for a path we just wrote are ignored
    /// (default: 1 second)
    pub suppression_window_ms: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            auto_save: true,
            auto_save_delay_ms: 1000,
            draft_delay_ms: 500,
            suppression_window_ms: 1000,
        }
    }
}

impl SyncSettings {
    pub fn auto_save_delay(&self) -> Duration {
        Duration::from_millis(self.auto_save_delay_ms)
    }

    pub fn draft_delay(&self) -> Duration {
        Duration::from_millis(self.draft_delay_ms)
    }

    pub fn suppression_window(&self) -> Duration {
        Duration::from_millis(self.suppression_window_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = SyncSettings::default();
        assert!(settings.auto_save);
        assert_eq!(settings.auto_save_delay(), Duration::from_secs(1));
        assert_eq!(settings.draft_delay(), Duration::from_millis(500));
        assert_eq!(settings.suppression_window(), Duration::from_secs(1));
    }

    #[test]
    fn test_partial_json_merges_with_defaults() {
        let settings: SyncSettings =
            serde_json::from_str(r#"{"auto_save": false, "auto_save_delay_ms": 3000}"#).unwrap();

        assert!(!settings.auto_save);
        assert_eq!(settings.auto_save_delay_ms, 3000);
        assert_eq!(settings.draft_delay_ms, 500);
    }
}
