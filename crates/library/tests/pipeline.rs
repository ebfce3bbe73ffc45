//! End-to-end import scenarios against a real directory tree.

use futures::StreamExt;
use romport_cache::Database;
use romport_catalog::{System, SystemCatalog, SystemId};
use romport_config::{HudConfig, Layout, WatcherConfig};
use romport_library::Context;
use romport_library::conflicts::{ConflictSource, ConflictSourceHandle, DirectoryRescan};
use romport_library::controller::LibraryUpdatesController;
use romport_library::import::{GameImporter, ImportEvent};
use romport_library::queue::{ImportQueue, ImportStatus};
use romport_library::watch::{DirectoryWatcher, WatchEvent};
use romport_storage::BackendHandle;
use romport_storage::backend::LocalBackend;
use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use zip::write::SimpleFileOptions;

const TIMEOUT: Duration = Duration::from_secs(10);

struct Library {
    root: TempDir,
    db: Database,
    importer: Arc<GameImporter>,
    conflicts: DirectoryRescan,
}

impl Library {
    async fn new(files: &[(&str, &[u8])]) -> Self {
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
                    System::new("snes", "Super Nintendo", &["sfc", "smc"]),
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
        let conflicts = DirectoryRescan::from_context(&ctx);
        let importer = Arc::new(GameImporter::new(ctx, Arc::new(ImportQueue::new())));
        Self { root, db, importer, conflicts }
    }

    fn exists(&self, path: &str) -> bool {
        self.root.path().join(path).exists()
    }

    fn write_zip(&self, path: &str, entries: &[(&str, &[u8])]) {
        let mut zip = zip::ZipWriter::new(File::create(self.root.path().join(path)).unwrap());
        for (name, data) in entries {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }
}

fn watcher_config() -> WatcherConfig {
    WatcherConfig { stabilization_ms: 50, tick_ms: 10 }
}

#[tokio::test(flavor = "multi_thread")]
async fn single_system_rom_is_filed() {
    let library = Library::new(&[("Imports/mario.sfc", b"SNES ROM")]).await;
    let mut updates = library.importer.queue().subscribe();
    let summary = library.importer.get_rom_info_for_files(vec!["Imports/mario.sfc".into()], None).await.unwrap();

    assert_eq!(summary.imported, [PathBuf::from("ROMs/snes/mario.sfc")]);
    assert!(library.exists("ROMs/snes/mario.sfc"));
    assert!(!library.exists("Imports/mario.sfc"));
    assert!(library.conflicts.conflicts().await.unwrap().is_empty());

    let item = updates.borrow_and_update().find_by_path("ROMs/snes/mario.sfc").cloned().unwrap();
    assert_eq!(item.status, ImportStatus::Success);
    assert_eq!(item.target, Some(SystemId::from("snes")));
    let game = library.importer.context().games.get_by_path("ROMs/snes/mario.sfc").await.unwrap().unwrap();
    assert_eq!(game.system, SystemId::from("snes"));
    library.db.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn ambiguous_rom_is_resolved_by_the_user() {
    let library = Library::new(&[("Imports/game.bin", b"GENESIS OR SEGA CD")]).await;
    let summary = library.importer.get_rom_info_for_files(vec!["Imports/game.bin".into()], None).await.unwrap();
    assert_eq!(summary.conflicts, [PathBuf::from("Conflicts/game.bin")]);

    let conflicts = library.conflicts.conflicts().await.unwrap();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].candidates, [SystemId::from("genesis"), SystemId::from("segacd")]);
    let queued = library.importer.queue().conflicts();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].candidates, conflicts[0].candidates);

    let mut solutions = HashMap::new();
    solutions.insert(PathBuf::from("Conflicts/game.bin"), SystemId::from("genesis"));
    let summary = library.importer.resolve_conflicts(solutions).await.unwrap();
    assert_eq!(summary.imported, [PathBuf::from("ROMs/genesis/game.bin")]);
    assert!(library.exists("ROMs/genesis/game.bin"));
    assert!(library.conflicts.conflicts().await.unwrap().is_empty());
    assert!(library.importer.queue().conflicts().is_empty());
    library.db.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn extracted_archive_is_imported_as_one_batch() {
    let library = Library::new(&[]).await;
    library.write_zip("Imports/pack.zip", &[("f1.sfc", b"one"), ("f2.sfc", b"two"), ("f3.md", b"three")]);
    let mut import_events = pin!(library.importer.events());

    let (watcher, mut watch_events) =
        DirectoryWatcher::start(library.root.path(), Path::new("Imports"), &watcher_config()).await.unwrap();
    let mut started = false;
    let mut updates = 0;
    let mut completed = None;
    let batch = loop {
        match tokio::time::timeout(TIMEOUT, watch_events.recv()).await.unwrap().unwrap() {
            WatchEvent::Started { path } => {
                assert_eq!(path, Path::new("Imports/pack.zip"));
                started = true;
            },
            WatchEvent::Updated { .. } => {
                assert!(started && completed.is_none());
                updates += 1;
            },
            WatchEvent::Completed { extracted, .. } => completed = Some(extracted.unwrap()),
            WatchEvent::AllExtracted(files) => break files,
        }
    };
    watcher.stop().await;
    assert!(updates > 0);
    let mut completed = completed.unwrap();
    completed.sort();
    assert_eq!(
        completed,
        [PathBuf::from("Imports/f1.sfc"), PathBuf::from("Imports/f2.sfc"), PathBuf::from("Imports/f3.md")]
    );
    assert!(!library.exists("Imports/pack.zip"));

    let summary = library.importer.get_rom_info_for_files(batch, None).await.unwrap();
    assert_eq!(summary.imported.len(), 3);
    assert!(summary.contains_import("ROMs/genesis/f3.md"));

    let mut started = 0;
    let mut finished = 0;
    let mut batches = 0;
    assert_eq!(import_events.next().await, Some(ImportEvent::Initialized));
    while batches == 0 {
        match tokio::time::timeout(TIMEOUT, import_events.next()).await.unwrap().unwrap() {
            ImportEvent::Started(_) => started += 1,
            ImportEvent::Finished { was_modified, .. } => {
                assert!(!was_modified);
                finished += 1;
                assert!(finished <= started);
            },
            ImportEvent::Completed { had_conflicts } => {
                assert!(!had_conflicts);
                batches += 1;
            },
            event => panic!("unexpected event {event:?}"),
        }
    }
    assert_eq!((started, finished), (3, 3));
    library.db.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn controller_nests_extracted_files_under_their_archive() {
    let library = Library::new(&[]).await;
    library.write_zip("Imports/pack.zip", &[("f1.sfc", b"one"), ("f2.sfc", b"two")]);
    let source: ConflictSourceHandle = Arc::new(DirectoryRescan::from_context(library.importer.context()));
    let controller = LibraryUpdatesController::start(
        Arc::clone(&library.importer),
        library.root.path(),
        &watcher_config(),
        &HudConfig::default(),
        source,
    )
    .await
    .unwrap();

    let mut queue = controller.queue().subscribe();
    let snapshot = tokio::time::timeout(
        TIMEOUT,
        queue.wait_for(|snapshot| {
            snapshot.roots().any(|archive| {
                archive.children.len() == 2
                    && archive.children.iter().all(|id| snapshot.get(*id).is_some_and(|c| c.status == ImportStatus::Success))
            })
        }),
    )
    .await
    .unwrap()
    .unwrap()
    .clone();

    let archive = snapshot.roots().next().unwrap();
    assert_eq!(archive.source, Path::new("Imports/pack.zip"));
    assert_eq!(archive.status, ImportStatus::Success);
    let depths: Vec<usize> = snapshot.iter().map(|(depth, _)| depth).collect();
    assert_eq!(depths, [0, 1, 1]);
    assert!(library.exists("ROMs/snes/f1.sfc"));
    assert!(library.exists("ROMs/snes/f2.sfc"));
    controller.shutdown().await;
    library.db.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn archive_present_at_startup_is_imported_once() {
    let library = Library::new(&[("Imports/mario.sfc", b"SNES ROM")]).await;
    library.write_zip("Imports/pack.zip", &[("f1.sfc", b"one"), ("f2.md", b"two"), ("f3.sfc", b"three")]);
    let source: ConflictSourceHandle = Arc::new(DirectoryRescan::from_context(library.importer.context()));
    let controller = LibraryUpdatesController::start(
        Arc::clone(&library.importer),
        library.root.path(),
        &watcher_config(),
        &HudConfig::default(),
        source,
    )
    .await
    .unwrap();

    let mut queue = controller.queue().subscribe();
    tokio::time::timeout(
        TIMEOUT,
        queue.wait_for(|snapshot| {
            snapshot.len() == 5 && snapshot.iter().all(|(_, item)| item.status == ImportStatus::Success)
        }),
    )
    .await
    .unwrap()
    .unwrap();
    // Let the batch for the extracted files run, if the initial scan beat it.
    tokio::time::sleep(Duration::from_millis(200)).await;
    controller.wait_idle().await;

    let snapshot = controller.queue().snapshot();
    let outcomes: Vec<(PathBuf, ImportStatus)> =
        snapshot.iter().map(|(_, item)| (item.source.clone(), item.status)).collect();
    assert_eq!(snapshot.len(), 5, "{outcomes:?}");
    assert!(outcomes.iter().all(|(_, status)| *status == ImportStatus::Success), "{outcomes:?}");
    for path in ["ROMs/snes/mario.sfc", "ROMs/snes/f1.sfc", "ROMs/genesis/f2.md", "ROMs/snes/f3.sfc"] {
        assert!(library.exists(path), "{path} missing");
    }
    controller.shutdown().await;
    library.db.close().await;
}
