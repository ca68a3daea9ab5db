//! Document identity: a real file, or a synthetic untitled document.
//!
//! Untitled documents live in the `UNTITLED://<name>` namespace. They have no
//! disk counterpart until the first save-as and are never watched. The string
//! form of a `DocPath` is also its key in the draft cache.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Prefix of the synthetic untitled namespace.
pub const UNTITLED_PREFIX: &str = "UNTITLED://";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DocPath {
    /// A canonical filesystem path.
    File(PathBuf),
    /// A document that has never been saved, identified by its name.
    Untitled(String),
}

impl DocPath {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        DocPath::File(path.into())
    }

    pub fn untitled(name: impl Into<String>) -> Self {
        DocPath::Untitled(name.into())
    }

    pub fn is_untitled(&self) -> bool {
        matches!(self, DocPath::Untitled(_))
    }

    /// The on-disk path, if this document has one.
    pub fn as_file(&self) -> Option<&Path> {
        match self {
            DocPath::File(path) => Some(path),
            DocPath::Untitled(_) => None,
        }
    }

    /// Name shown on the tab: the file name, or the untitled name.
    pub fn display_name(&self) -> String {
        match self {
            DocPath::File(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "Untitled".to_string()),
            DocPath::Untitled(name) => name.clone(),
        }
    }

    /// Extension taken from the display name (text after the last dot).
    pub fn extension(&self) -> Option<String> {
        let name = self.display_name();
        match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => Some(ext.to_string()),
            _ => None,
        }
    }

    /// Key used by the draft cache.
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocPath::File(path) => write!(f, "{}", path.display()),
            DocPath::Untitled(name) => write!(f, "{}{}", UNTITLED_PREFIX, name),
        }
    }
}

impl FromStr for DocPath {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.strip_prefix(UNTITLED_PREFIX) {
            Some(name) => DocPath::Untitled(name.to_string()),
            None => DocPath::File(PathBuf::from(s)),
        })
    }
}

impl From<&Path> for DocPath {
    fn from(path: &Path) -> Self {
        DocPath::File(path.to_path_buf())
    }
}

impl From<PathBuf> for DocPath {
    fn from(path: PathBuf) -> Self {
        DocPath::File(path)
    }
}

impl Serialize for DocPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DocPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        // Infallible
        Ok(s.parse().unwrap_or_else(|never| match never {}))
    }
}
