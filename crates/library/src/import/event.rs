use std::path::{Path, PathBuf};

/// Lifecycle signals published by the [`GameImporter`](super::GameImporter).
///
/// `Initialized` comes first, exactly once. Within a batch, every file's
/// `Started` precedes its outcome, and `Completed` follows all of them.
/// `FinishedArtwork` for downloaded artwork may arrive after `Completed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportEvent {
    Initialized,
    /// Processing of the file at this path has begun.
    Started(PathBuf),
    /// A game or BIOS file was filed away. `was_modified` is `true` when the
    /// library already knew the content (re-import or duplicate copy).
    Finished { md5: String, was_modified: bool },
    /// Artwork was stored at this path, or could not be fetched.
    FinishedArtwork(Option<PathBuf>),
    Completed { had_conflicts: bool },
}

/// What happened to each file of a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSummary {
    /// Final locations of imported files.
    pub imported: Vec<PathBuf>,
    /// Locations in the conflicts folder.
    pub conflicts: Vec<PathBuf>,
    /// Source paths of files that failed.
    pub failed: Vec<PathBuf>,
}
impl ImportSummary {
    pub fn had_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.imported.is_empty() && self.conflicts.is_empty() && self.failed.is_empty()
    }

    pub fn merge(&mut self, other: ImportSummary) {
        self.imported.extend(other.imported);
        self.conflicts.extend(other.conflicts);
        self.failed.extend(other.failed);
    }

    pub fn contains_import(&self, path: impl AsRef<Path>) -> bool {
        self.imported.iter().any(|imported| imported == path.as_ref())
    }
}
