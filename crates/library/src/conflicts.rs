//! Conflict detection.
//!
//! A conflict is a file the importer could not pair with exactly one system.
//! Two [`ConflictSource`]s exist: [`DirectoryRescan`] treats the conflicts
//! folder as the truth (it survives restarts and picks up files moved there
//! by hand), [`QueueConflicts`] reports what the importer recorded in this
//! session. Both drop conflicts without candidates: there is nothing for the
//! user to choose.

use crate::Context;
use crate::error::{ErrorKind, Result};
use crate::queue::ImportQueue;
use async_trait::async_trait;
use exn::ResultExt;
use romport_catalog::{SharedCatalog, SystemId, cue, sort_import_paths};
use romport_storage::{BackendHandle, is_hidden, validate_path};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A file waiting for the user to pick its system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    /// Location in the conflicts folder, relative to the library root.
    pub path: PathBuf,
    /// Never empty.
    pub candidates: Vec<SystemId>,
}

#[async_trait]
pub trait ConflictSource: Send + Sync {
    async fn conflicts(&self) -> Result<Vec<Conflict>>;
}

pub type ConflictSourceHandle = Arc<dyn ConflictSource>;

/// Lists the conflicts folder and matches each file's extension against the
/// catalog.
pub struct DirectoryRescan {
    backend: BackendHandle,
    catalog: SharedCatalog,
    dir: PathBuf,
}

impl DirectoryRescan {
    pub fn new(backend: BackendHandle, catalog: SharedCatalog, dir: impl Into<PathBuf>) -> Self {
        Self { backend, catalog, dir: dir.into() }
    }

    pub fn from_context(ctx: &Context) -> Self {
        Self::new(ctx.backend.clone(), ctx.catalog.clone(), ctx.layout.conflicts.clone())
    }
}

#[async_trait]
impl ConflictSource for DirectoryRescan {
    #[tracing::instrument(skip_all, fields(dir = %self.dir.display()))]
    async fn conflicts(&self) -> Result<Vec<Conflict>> {
        let listed = self.backend.list(Some(&self.dir)).await.or_raise(|| ErrorKind::Storage)?;
        let mut files: Vec<PathBuf> = listed
            .into_iter()
            .filter(|info| info.is_child_of(&self.dir) && !is_hidden(&info.path))
            .map(|info| info.path)
            .collect();
        files.sort();
        sort_import_paths(&mut files);

        // Tracks are resolved together with their cue sheet.
        let mut tracks = HashSet::new();
        for sheet in files.iter().filter(|path| path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("cue"))) {
            match self.backend.read(sheet).await {
                Ok(data) => tracks.extend(cue::companion_paths(sheet, &String::from_utf8_lossy(&data))),
                Err(e) => tracing::warn!(path = %sheet.display(), error = ?e, "could not read cue sheet"),
            }
        }

        let conflicts: Vec<Conflict> = files
            .into_iter()
            .filter(|path| !tracks.contains(path))
            .map(|path| Conflict { candidates: self.catalog.candidates_for(&path), path })
            .filter(|conflict| !conflict.candidates.is_empty())
            .collect();
        tracing::debug!(conflicts = conflicts.len(), "rescanned conflicts");
        Ok(conflicts)
    }
}

/// Delete a conflicted file, and the tracks of a cue sheet, instead of
/// importing it. `path` must lie inside the conflicts folder.
#[tracing::instrument(skip(ctx), fields(path = %path.display()))]
pub async fn delete(ctx: &Context, path: &Path) -> Result<()> {
    let path = in_conflicts_folder(&ctx.layout.conflicts, path)?;
    let path = path.as_path();
    let mut tracks = Vec::new();
    if path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("cue")) {
        match ctx.backend.read(path).await {
            Ok(data) => tracks.extend(cue::companion_paths(path, &String::from_utf8_lossy(&data))),
            Err(e) => tracing::warn!(error = ?e, "could not read cue sheet"),
        }
    }
    ctx.backend.delete(path).await.or_raise(|| ErrorKind::Storage)?;
    for track in tracks {
        match ctx.backend.exists(&track).await {
            Ok(true) => ctx.backend.delete(&track).await.or_raise(|| ErrorKind::Storage)?,
            Ok(false) => {},
            Err(e) => tracing::warn!(track = %track.display(), error = ?e, "could not check cue track"),
        }
    }
    tracing::info!("conflict deleted");
    Ok(())
}

/// Normalizes `path` and checks that it names a visible file inside the
/// conflicts folder.
pub(crate) fn in_conflicts_folder(conflicts: &Path, path: &Path) -> Result<PathBuf> {
    let normalized = validate_path(path).or_raise(|| ErrorKind::Conflict)?;
    if !normalized.starts_with(conflicts) || normalized == conflicts || is_hidden(&normalized) {
        exn::bail!(ErrorKind::Conflict);
    }
    Ok(normalized)
}

/// Conflicts recorded on the [`ImportQueue`], in queue order.
pub struct QueueConflicts {
    queue: Arc<ImportQueue>,
}

impl QueueConflicts {
    pub fn new(queue: Arc<ImportQueue>) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl ConflictSource for QueueConflicts {
    async fn conflicts(&self) -> Result<Vec<Conflict>> {
        let mut seen = HashSet::new();
        Ok(self
            .queue
            .conflicts()
            .into_iter()
            .filter(|item| !item.candidates.is_empty() && seen.insert(item.location.clone()))
            .map(|item| Conflict { path: item.location, candidates: item.candidates })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use romport_catalog::{FileType, System, SystemCatalog};
    use romport_storage::backend::{MockBackend, StorageBackend};
    use rstest::rstest;

    fn catalog() -> SharedCatalog {
        Arc::new(
            SystemCatalog::new(
                [
                    System::new("genesis", "Sega Genesis", &["md", "bin"]),
                    System::new("segacd", "Sega CD", &["cue", "bin", "iso"]),
                    System::new("psx", "PlayStation", &["cue"]),
                ],
                [],
            )
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_directory_rescan() {
        let backend = Arc::new(MockBackend::with_files([
            ("Conflicts/game.bin", "g"),
            ("Conflicts/Disc.cue", "FILE \"Disc.bin\" BINARY\n"),
            ("Conflicts/Disc.bin", "d"),
            ("Conflicts/notes.txt", "n"),
            ("Conflicts/.DS_Store", "x"),
            ("Imports/other.bin", "o"),
        ]));
        let source = DirectoryRescan::new(backend, catalog(), "Conflicts");
        let conflicts = source.conflicts().await.unwrap();
        assert_eq!(
            conflicts,
            [
                Conflict {
                    path: "Conflicts/Disc.cue".into(),
                    candidates: vec![SystemId::from("segacd"), SystemId::from("psx")],
                },
                Conflict {
                    path: "Conflicts/game.bin".into(),
                    candidates: vec![SystemId::from("genesis"), SystemId::from("segacd")],
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_queue_conflicts() {
        let queue = Arc::new(ImportQueue::new());
        let ambiguous = queue.push("Imports/game.bin", FileType::Game).await;
        let unknown = queue.push("Imports/notes.txt", FileType::Unknown).await;
        for id in [ambiguous, unknown] {
            queue.mark_processing(id).await.unwrap();
        }
        let candidates = vec![SystemId::from("genesis"), SystemId::from("segacd")];
        queue.conflict(ambiguous, candidates.clone(), "Conflicts/game.bin".into()).await.unwrap();
        queue.conflict(unknown, vec![], "Conflicts/notes.txt".into()).await.unwrap();

        let conflicts = QueueConflicts::new(queue).conflicts().await.unwrap();
        assert_eq!(conflicts, [Conflict { path: "Conflicts/game.bin".into(), candidates }]);
    }

    #[tokio::test]
    async fn test_delete_takes_tracks_along() {
        let db = romport_cache::Database::connect_in_memory().await.unwrap();
        let backend = Arc::new(MockBackend::with_files([
            ("Conflicts/Disc.cue", "FILE \"Disc.bin\" BINARY\n"),
            ("Conflicts/Disc.bin", "d"),
            ("Conflicts/game.bin", "g"),
        ]));
        let ctx = Context::new(backend.clone(), catalog(), romport_config::Layout::default(), (&db).into());
        delete(&ctx, Path::new("Conflicts/Disc.cue")).await.unwrap();
        let left: Vec<PathBuf> = backend.list(None).await.unwrap().into_iter().map(|info| info.path).collect();
        assert_eq!(left, [PathBuf::from("Conflicts/game.bin")]);

        let err = delete(&ctx, Path::new("ROMs/genesis/game.bin")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Conflict));
        db.close().await;
    }

    #[rstest]
    #[case("Conflicts/../ROMs/snes/mario.sfc")]
    #[case("Conflicts/./..")]
    #[case("Conflicts/.hidden.bin")]
    #[case("Conflicts")]
    #[case("../Conflicts/game.bin")]
    #[tokio::test]
    async fn test_delete_stays_inside_conflicts(#[case] path: &str) {
        let db = romport_cache::Database::connect_in_memory().await.unwrap();
        let backend = Arc::new(MockBackend::with_files([
            ("ROMs/snes/mario.sfc", "m"),
            ("Conflicts/.hidden.bin", "h"),
            ("Conflicts/game.bin", "g"),
        ]));
        let ctx = Context::new(backend.clone(), catalog(), romport_config::Layout::default(), (&db).into());
        let err = delete(&ctx, Path::new(path)).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Conflict));
        assert_eq!(backend.list(None).await.unwrap().len(), 3);
        db.close().await;
    }

    #[tokio::test]
    async fn test_delete_ignores_tracks_outside_the_sheet_folder() {
        let db = romport_cache::Database::connect_in_memory().await.unwrap();
        let backend = Arc::new(MockBackend::with_files([
            ("Conflicts/Disc.cue", "FILE \"../ROMs/snes/mario.sfc\" BINARY\nFILE \"Disc.bin\" BINARY\n"),
            ("Conflicts/Disc.bin", "d"),
            ("ROMs/snes/mario.sfc", "m"),
        ]));
        let ctx = Context::new(backend.clone(), catalog(), romport_config::Layout::default(), (&db).into());
        delete(&ctx, Path::new("Conflicts/./Disc.cue")).await.unwrap();
        let left: Vec<PathBuf> = backend.list(None).await.unwrap().into_iter().map(|info| info.path).collect();
        assert_eq!(left, [PathBuf::from("ROMs/snes/mario.sfc")]);
        db.close().await;
    }
}
