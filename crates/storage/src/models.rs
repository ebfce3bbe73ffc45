//! Storage models.

use std::path::{Path, PathBuf};
use time::UtcDateTime;

/// File metadata returned by storage backends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Relative path from storage root
    pub path: PathBuf,
    /// File size in bytes
    pub size: u64,
    /// Last modified timestamp
    pub modified: UtcDateTime,
}
impl FileInfo {
    pub fn new(path: impl Into<PathBuf>, size: u64, modified: UtcDateTime) -> Self {
        Self { path: path.into(), size, modified }
    }

    /// Whether this file sits directly inside `dir` (not in a subdirectory).
    pub fn is_child_of(&self, dir: impl AsRef<Path>) -> bool {
        self.path.parent() == Some(dir.as_ref())
    }

    pub fn extension(&self) -> Option<String> {
        self.path.extension().map(|ext| ext.to_string_lossy().to_lowercase())
    }
}

/// Dotfiles (`.DS_Store`, `._game.bin`, partial downloads) are never library content.
pub fn is_hidden(path: impl AsRef<Path>) -> bool {
    path.as_ref().file_name().is_some_and(|name| name.to_string_lossy().starts_with('.'))
}
