//! Library update controller.
//!
//! Wires the [`DirectoryWatcher`] and the [`GameImporter`] together:
//!
//! - After the importer is initialized, files already sitting in the import
//!   directory are imported as one batch.
//! - Archives the watcher extracts become queue items with the extracted
//!   files nested below them, and every `AllExtracted` batch is imported.
//! - Whenever a batch completes, the conflict list is refreshed.
//!
//! Two observables come out of it: the [`HudState`] and the list of
//! [`Conflict`]s waiting for the user.

mod hud;

pub use self::hud::{Hud, HudState, HudUpdate, from_import_event, from_watch_event};
use crate::conflicts::{self, Conflict, ConflictSourceHandle};
use crate::error::{ErrorKind, Result};
use crate::import::{GameImporter, ImportEvent, ImportSummary};
use crate::queue::{ImportQueue, ImportStatus, ItemId};
use crate::scan;
use crate::watch::{DirectoryWatcher, WatchEvent};
use exn::ResultExt;
use futures::{Stream, StreamExt};
use romport_catalog::{FileType, SystemId};
use romport_config::{HudConfig, WatcherConfig};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::pin::pin;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, instrument};

/// State shared between the controller handle and its event pump.
struct Shared {
    importer: Arc<GameImporter>,
    source: ConflictSourceHandle,
    conflicts: watch::Sender<Vec<Conflict>>,
    batches: TaskTracker,
}

impl Shared {
    async fn refresh_conflicts(&self) -> Result<Vec<Conflict>> {
        let conflicts = self.source.conflicts().await.or_raise(|| ErrorKind::Conflict)?;
        tracing::debug!(conflicts = conflicts.len(), "conflicts refreshed");
        self.conflicts.send_replace(conflicts.clone());
        Ok(conflicts)
    }

    fn spawn_import(self: &Arc<Self>, paths: Vec<PathBuf>) {
        if paths.is_empty() {
            return;
        }
        let shared = Arc::clone(self);
        self.batches.spawn(
            async move {
                if let Err(e) = shared.importer.get_rom_info_for_files(paths, None).await {
                    tracing::error!(error = ?e, "import batch failed");
                }
            }
            .in_current_span(),
        );
    }

    fn queue(&self) -> &Arc<ImportQueue> {
        self.importer.queue()
    }
}

/// Runs the import pipeline for one library. Stops on [`shutdown()`](Self::shutdown)
/// or when dropped.
pub struct LibraryUpdatesController {
    shared: Arc<Shared>,
    hud: watch::Receiver<HudState>,
    cancel: CancellationToken,
    pump: Option<JoinHandle<()>>,
    watcher: Option<DirectoryWatcher>,
}

impl LibraryUpdatesController {
    /// Start watching the import directory below the absolute library `root`.
    ///
    /// Fails if the import directory does not exist. Must be called from
    /// within a Tokio runtime.
    #[instrument(skip_all, fields(root = %root.display()))]
    pub async fn start(
        importer: Arc<GameImporter>,
        root: &Path,
        watcher_config: &WatcherConfig,
        hud_config: &HudConfig,
        source: ConflictSourceHandle,
    ) -> Result<Self> {
        let imports = importer.context().layout.imports.clone();
        let absolute = root.join(&imports);
        let is_dir = tokio::fs::metadata(&absolute).await.is_ok_and(|meta| meta.is_dir());
        if !is_dir {
            exn::bail!(ErrorKind::MissingImportDirectory(absolute));
        }

        // Subscribe before initializing so the initial scan is never missed.
        let import_events = importer.events();
        let (watcher, watch_events) =
            DirectoryWatcher::start(root, &imports, watcher_config).await.or_raise(|| ErrorKind::Watch)?;
        let (conflicts, _) = watch::channel(Vec::new());
        let shared = Arc::new(Shared { importer, source, conflicts, batches: TaskTracker::new() });
        let hud = Hud::new(hud_config.hide_delay());
        let hud_state = hud.subscribe();
        let cancel = CancellationToken::new();
        let pump = tokio::spawn(
            Pump { shared: Arc::clone(&shared), hud, archives: HashMap::new() }
                .run(import_events, watch_events, cancel.clone())
                .in_current_span(),
        );
        shared.importer.initialize();
        if let Err(e) = shared.refresh_conflicts().await {
            tracing::warn!(error = ?e, "could not list conflicts");
        }
        tracing::info!("library update controller started");
        Ok(Self { shared, hud: hud_state, cancel, pump: Some(pump), watcher: Some(watcher) })
    }

    pub fn hud_state(&self) -> watch::Receiver<HudState> {
        self.hud.clone()
    }

    /// Conflicts as of the last refresh. Every entry has at least one
    /// candidate system.
    pub fn conflicts(&self) -> watch::Receiver<Vec<Conflict>> {
        self.shared.conflicts.subscribe()
    }

    pub fn importer(&self) -> &Arc<GameImporter> {
        &self.shared.importer
    }

    pub fn queue(&self) -> &Arc<ImportQueue> {
        self.shared.queue()
    }

    pub async fn refresh_conflicts(&self) -> Result<Vec<Conflict>> {
        self.shared.refresh_conflicts().await
    }

    /// Import conflicted files for the systems the user picked, then refresh
    /// the conflict list.
    pub async fn resolve_conflicts(&self, solutions: HashMap<PathBuf, SystemId>) -> Result<ImportSummary> {
        let summary = self.shared.importer.resolve_conflicts(solutions).await?;
        self.shared.refresh_conflicts().await?;
        Ok(summary)
    }

    /// Delete a conflicted file (and the tracks of a cue sheet) instead of
    /// importing it.
    pub async fn delete_conflict(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        conflicts::delete(self.shared.importer.context(), path).await?;
        if let Some(item) = self.queue().find_by_path(path)
            && let Err(e) = self.queue().remove(item.id).await
        {
            tracing::warn!(error = ?e, "could not remove deleted conflict from the queue");
        }
        self.shared.refresh_conflicts().await?;
        Ok(())
    }

    pub async fn import_rom_directories(&self) -> Result<ImportSummary> {
        self.shared.importer.import_rom_directories().await
    }

    /// Wait until every import batch started by the controller has finished.
    pub async fn wait_idle(&self) {
        self.shared.batches.close();
        self.shared.batches.wait().await;
        self.shared.batches.reopen();
    }

    /// Stop watching, then let running batches and artwork downloads finish.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(watcher) = self.watcher.take() {
            watcher.stop().await;
        }
        if let Some(pump) = self.pump.take()
            && let Err(e) = pump.await
        {
            tracing::warn!(error = %e, "controller did not stop cleanly");
        }
        self.wait_idle().await;
        self.shared.importer.wait_for_artwork().await;
        tracing::info!("library update controller stopped");
    }
}

impl Drop for LibraryUpdatesController {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Consumes both event sources on a background task.
struct Pump {
    shared: Arc<Shared>,
    hud: Hud,
    /// Queue items of archives being extracted.
    archives: HashMap<PathBuf, ItemId>,
}

impl Pump {
    async fn run(
        mut self,
        import_events: impl Stream<Item = ImportEvent>,
        mut watch_events: mpsc::UnboundedReceiver<WatchEvent>,
        cancel: CancellationToken,
    ) {
        let mut import_events = pin!(import_events);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                Some(event) = import_events.next() => {
                    if let Some(update) = from_import_event(&event) {
                        self.hud.apply(update);
                    }
                    self.on_import_event(event).await;
                },
                Some(event) = watch_events.recv() => {
                    if let Some(update) = from_watch_event(&event) {
                        self.hud.apply(update);
                    }
                    self.on_watch_event(event).await;
                },
                _ = self.hud.hide_due(), if self.hud.is_hiding() => self.hud.hide(),
            }
        }
        tracing::debug!("controller event pump stopped");
    }

    async fn on_import_event(&mut self, event: ImportEvent) {
        match event {
            ImportEvent::Initialized => match self.waiting_imports().await {
                Ok(files) => {
                    let catalog = &self.shared.importer.context().catalog;
                    for file in &files {
                        if self.shared.queue().find_by_path(file).is_none() {
                            self.shared.queue().push(file, catalog.classify(file, None)).await;
                        }
                    }
                    tracing::info!(files = files.len(), "importing files waiting in the import directory");
                    self.shared.spawn_import(files);
                },
                Err(e) => tracing::error!(error = ?e, "could not scan import directory"),
            },
            ImportEvent::Completed { .. } => {
                if let Err(e) = self.shared.refresh_conflicts().await {
                    tracing::warn!(error = ?e, "could not refresh conflicts");
                }
            },
            _ => {},
        }
    }

    async fn on_watch_event(&mut self, event: WatchEvent) {
        let queue = Arc::clone(self.shared.queue());
        match event {
            WatchEvent::Started { path } => {
                let id = queue.push(&path, FileType::Unknown).await;
                if let Err(e) = queue.mark_processing(id).await {
                    tracing::warn!(error = ?e, "could not update import queue");
                }
                self.archives.insert(path, id);
            },
            WatchEvent::Updated { .. } => {},
            WatchEvent::Completed { path, extracted } => {
                let Some(id) = self.archives.remove(&path) else {
                    tracing::debug!(path = %path.display(), "completion for an untracked archive");
                    return;
                };
                let result = match extracted {
                    Some(files) => self.nest(id, files).await,
                    None => queue.fail(id, "extraction failed").await,
                };
                if let Err(e) = result {
                    tracing::warn!(path = %path.display(), error = ?e, "could not update import queue");
                }
            },
            WatchEvent::AllExtracted(files) => {
                // The initial scan may have picked some of them up already. The
                // importer skips whatever another batch claimed in the meantime.
                let files = files
                    .into_iter()
                    .filter(|file| queue.find_by_path(file).is_none_or(|item| item.status == ImportStatus::Queued))
                    .collect();
                self.shared.spawn_import(files);
            },
        }
    }

    async fn waiting_imports(&self) -> Result<Vec<PathBuf>> {
        let ctx = self.shared.importer.context();
        scan::waiting_imports(ctx.backend.as_ref(), &ctx.layout).await
    }

    /// Record the extracted files under their archive and finish it.
    async fn nest(&self, archive: ItemId, files: Vec<PathBuf>) -> crate::queue::error::Result<()> {
        let queue = self.shared.queue();
        let catalog = &self.shared.importer.context().catalog;
        let mut known = Vec::new();
        for file in files {
            match queue.find_by_path(&file) {
                Some(item) => known.push(item.id),
                None => {
                    queue.push_child(archive, &file, catalog.classify(&file, None)).await?;
                },
            }
        }
        if !known.is_empty() {
            queue.attach_children(archive, &known).await?;
        }
        queue.complete(archive, None, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Context;
    use crate::conflicts::{ConflictSource, DirectoryRescan};
    use romport_cache::Database;
    use romport_catalog::{System, SystemCatalog};
    use romport_config::Layout;
    use romport_storage::BackendHandle;
    use romport_storage::backend::LocalBackend;
    use std::time::Duration;

    const TIMEOUT: Duration = Duration::from_secs(10);

    struct Library {
        root: tempfile::TempDir,
        db: Database,
        importer: Arc<GameImporter>,
        source: ConflictSourceHandle,
    }

    async fn library(files: &[(&str, &[u8])]) -> Library {
        let root = tempfile::tempdir().unwrap();
        let layout = Layout::default();
        for (_, folder) in layout.folders() {
            std::fs::create_dir_all(root.path().join(folder)).unwrap();
        }
        for (path, data) in files {
            std::fs::write(root.path().join(path), data).unwrap();
        }
        let catalog = Arc::new(
            SystemCatalog::new(
                [
                    System::new("snes", "Super Nintendo", &["sfc"]),
                    System::new("genesis", "Sega Genesis", &["md", "bin"]),
                    System::new("segacd", "Sega CD", &["cue", "bin"]),
                ],
                [],
            )
            .unwrap(),
        );
        let backend: BackendHandle = Arc::new(LocalBackend::new("library", root.path()).unwrap());
        let db = Database::connect_in_memory().await.unwrap();
        let ctx = Context::new(backend, catalog, layout, (&db).into());
        let source: ConflictSourceHandle = Arc::new(DirectoryRescan::from_context(&ctx));
        let importer = Arc::new(GameImporter::new(ctx, Arc::new(ImportQueue::new())));
        Library { root, db, importer, source }
    }

    async fn start(library: &Library) -> Result<LibraryUpdatesController> {
        let watcher = WatcherConfig { stabilization_ms: 50, tick_ms: 10 };
        LibraryUpdatesController::start(
            Arc::clone(&library.importer),
            library.root.path(),
            &watcher,
            &HudConfig::default(),
            Arc::clone(&library.source),
        )
        .await
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_missing_import_directory_is_fatal() {
        let library = library(&[]).await;
        std::fs::remove_dir(library.root.path().join("Imports")).unwrap();
        let Err(err) = start(&library).await else {
            panic!("expected the controller to refuse to start");
        };
        assert!(matches!(&*err, ErrorKind::MissingImportDirectory(_)));
        library.db.close().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_initial_scan_imports_waiting_files() {
        let library = library(&[("Imports/mario.sfc", b"SNES"), ("Imports/game.bin", b"GEN or SCD")]).await;
        let controller = start(&library).await.unwrap();
        let mut conflicts = controller.conflicts();
        let settled = tokio::time::timeout(
            TIMEOUT,
            conflicts.wait_for(|conflicts| conflicts.iter().any(|c| c.path == Path::new("Conflicts/game.bin"))),
        )
        .await
        .unwrap()
        .unwrap()
        .clone();
        assert_eq!(settled[0].candidates, [SystemId::from("genesis"), SystemId::from("segacd")]);
        controller.wait_idle().await;

        let mario = controller.queue().find_by_path("Imports/mario.sfc").unwrap();
        assert_eq!(mario.status, ImportStatus::Success);
        assert!(library.root.path().join("ROMs/snes/mario.sfc").exists());

        let mut solutions = HashMap::new();
        solutions.insert(PathBuf::from("Conflicts/game.bin"), SystemId::from("genesis"));
        let summary = controller.resolve_conflicts(solutions).await.unwrap();
        assert!(summary.contains_import("ROMs/genesis/game.bin"));
        assert!(controller.conflicts().borrow().is_empty());
        controller.shutdown().await;
        library.db.close().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_delete_conflict() {
        let library = library(&[("Conflicts/game.bin", b"GEN or SCD")]).await;
        let controller = start(&library).await.unwrap();
        assert_eq!(controller.refresh_conflicts().await.unwrap().len(), 1);
        controller.delete_conflict("Conflicts/game.bin").await.unwrap();
        assert!(!library.root.path().join("Conflicts/game.bin").exists());
        assert!(controller.conflicts().borrow().is_empty());
        assert!(library.source.conflicts().await.unwrap().is_empty());

        let err = controller.delete_conflict("ROMs/snes/mario.sfc").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Conflict));
        controller.shutdown().await;
        library.db.close().await;
    }
}
