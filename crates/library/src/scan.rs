//! Directory scans feeding the importer.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use romport_catalog::System;
use romport_compress::is_archive;
use romport_config::Layout;
use romport_storage::{StorageBackend, is_hidden};
use std::path::PathBuf;

/// Files directly inside `system`'s ROM folder whose extension the system
/// recognizes, sorted by path.
///
/// Returns `None` when the folder holds no files at all (including when it
/// does not exist), so callers can tell "nothing here" apart from "nothing
/// this system can use". Dotfiles and subdirectories are ignored.
#[tracing::instrument(skip_all, fields(system = %system.id))]
pub async fn candidate_roms(
    backend: &dyn StorageBackend,
    layout: &Layout,
    system: &System,
) -> Result<Option<Vec<PathBuf>>> {
    let dir = layout.roms_dir(system);
    let files = backend.list(Some(&dir)).await.or_raise(|| ErrorKind::Storage)?;
    let mut children = files.into_iter().filter(|info| info.is_child_of(&dir) && !is_hidden(&info.path)).peekable();
    if children.peek().is_none() {
        return Ok(None);
    }
    let mut roms: Vec<PathBuf> = children
        .filter(|info| info.extension().is_some_and(|ext| system.recognizes(&ext)))
        .map(|info| info.path)
        .collect();
    roms.sort();
    tracing::debug!(found = roms.len(), "scanned ROM folder");
    Ok(Some(roms))
}

/// Visible files directly inside the import folder, sorted. Archives are
/// left to the watcher.
#[tracing::instrument(skip_all)]
pub async fn waiting_imports(backend: &dyn StorageBackend, layout: &Layout) -> Result<Vec<PathBuf>> {
    let dir = &layout.imports;
    let listed = backend.list(Some(dir)).await.or_raise(|| ErrorKind::Storage)?;
    let mut files: Vec<PathBuf> = listed
        .into_iter()
        .filter(|info| info.is_child_of(dir) && !is_hidden(&info.path) && !is_archive(&info.path))
        .map(|info| info.path)
        .collect();
    files.sort();
    Ok(files)
}
