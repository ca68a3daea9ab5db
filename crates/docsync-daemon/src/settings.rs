//! Settings file loading.

use anyhow::{Context, Result};
use docsync_core::SyncSettings;
use std::path::Path;
use tracing::{info, warn};

/// Parse a settings file. Missing fields take their defaults.
pub fn read_settings(path: &Path) -> Result<SyncSettings> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read settings file {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("Invalid settings file {}", path.display()))
}

/// Load settings, falling back to defaults when there is no file or it is
/// unusable.
pub fn load_settings(path: Option<&Path>) -> SyncSettings {
    let Some(path) = path else {
        return SyncSettings::default();
    };
    if !path.exists() {
        info!("No settings file at {}, using defaults", path.display());
        return SyncSettings::default();
    }
    match read_settings(path) {
        Ok(settings) => settings,
        Err(e) => {
            warn!("{:#}; using defaults", e);
            SyncSettings::default()
        }
    }
}
