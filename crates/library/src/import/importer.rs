use crate::Context;
use crate::error::{ErrorKind as LibraryErrorKind, Result as LibraryResult};
use crate::import::artwork::{self, FetcherHandle};
use crate::import::error::{ErrorKind, Result};
use crate::import::event::{ImportEvent, ImportSummary};
use crate::import::place::{MAX_NAME_ATTEMPTS, Placed, destination, numbered};
use crate::queue::{Claim, ImportQueue, ItemId};
use crate::{conflicts, scan};
use async_stream::stream;
use exn::{OptionExt, ResultExt};
use futures::Stream;
use romport_cache::Game;
use romport_catalog::{FileType, GameMetadata, SystemId, cue, is_cdrom, sort_import_paths};
use romport_storage::error::ErrorKind as StorageErrorKind;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex, broadcast};
use tokio_util::task::TaskTracker;
use tracing::{Instrument, instrument};

/// Events buffered per subscriber before the slowest one starts missing some.
const EVENT_CAPACITY: usize = 256;

/// Where one file of a batch ended up.
enum Outcome {
    Filed { location: PathBuf, target: Option<SystemId>, tracks: Vec<PathBuf> },
    Conflict { location: PathBuf, candidates: Vec<SystemId>, tracks: Vec<PathBuf> },
}

/// Imports files into the library. See the [module docs](crate::import).
///
/// Batches may run concurrently; every move into the library goes through a
/// single filesystem lock, and so do scans of the ROM folders.
pub struct GameImporter {
    ctx: Context,
    queue: Arc<ImportQueue>,
    events: broadcast::Sender<ImportEvent>,
    initialized: AtomicBool,
    fs_lock: Mutex<()>,
    fetcher: Option<FetcherHandle>,
    artwork_tasks: TaskTracker,
}

impl GameImporter {
    pub fn new(ctx: Context, queue: Arc<ImportQueue>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            ctx,
            queue,
            events,
            initialized: AtomicBool::new(false),
            fs_lock: Mutex::new(()),
            fetcher: None,
            artwork_tasks: TaskTracker::new(),
        }
    }

    /// Download artwork for games whose metadata carries an artwork URL.
    pub fn with_fetcher(mut self, fetcher: FetcherHandle) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn queue(&self) -> &Arc<ImportQueue> {
        &self.queue
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Announce that the importer is ready. Only the first call emits
    /// [`ImportEvent::Initialized`].
    pub fn initialize(&self) {
        if !self.initialized.swap(true, Ordering::AcqRel) {
            tracing::debug!("game importer initialized");
            self.emit(ImportEvent::Initialized);
        }
    }

    /// Subscribe to importer events.
    ///
    /// Late subscribers still see [`Initialized`](ImportEvent::Initialized)
    /// first, and never see it twice. A subscriber that falls more than a few
    /// hundred events behind skips the oldest ones. The stream ends once the
    /// importer and its artwork downloads are gone.
    pub fn events(&self) -> impl Stream<Item = ImportEvent> + Send + 'static {
        // Subscribe before reading the flag, so an initialization racing with
        // this call is either replayed or received, and then deduplicated.
        let mut receiver = self.events.subscribe();
        let mut initialized = self.is_initialized();
        stream! {
            if initialized {
                yield ImportEvent::Initialized;
            }
            loop {
                match receiver.recv().await {
                    Ok(ImportEvent::Initialized) if initialized => continue,
                    Ok(event) => {
                        initialized |= event == ImportEvent::Initialized;
                        yield event;
                    },
                    Err(RecvError::Lagged(skipped)) => tracing::warn!(skipped, "import event subscriber fell behind"),
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    fn emit(&self, event: ImportEvent) {
        // Nobody listening is fine.
        _ = self.events.send(event);
    }

    /// Import a batch of files (paths relative to the library root).
    ///
    /// With `user_chosen` set, every file is imported for that system without
    /// looking at its extension. Per-file failures are recorded on the queue
    /// and in the summary; they never stop the rest of the batch. Only an
    /// unknown `user_chosen` system fails the whole call, before anything is
    /// touched.
    #[instrument(skip_all, fields(files = paths.len(), system = ?user_chosen))]
    pub async fn get_rom_info_for_files(
        &self,
        paths: Vec<PathBuf>,
        user_chosen: Option<SystemId>,
    ) -> LibraryResult<ImportSummary> {
        self.import_batch(paths, user_chosen.as_ref()).await.or_raise(|| LibraryErrorKind::Import)
    }

    /// Import conflicted files for the systems the user picked.
    ///
    /// Conflicts missing from `solutions` stay where they are. Every path must
    /// name a file in the conflicts folder; anything else rejects the whole
    /// call before a file is touched.
    #[instrument(skip_all, fields(solutions = solutions.len()))]
    pub async fn resolve_conflicts(&self, solutions: HashMap<PathBuf, SystemId>) -> LibraryResult<ImportSummary> {
        let mut by_system: BTreeMap<SystemId, Vec<PathBuf>> = BTreeMap::new();
        for (path, system) in solutions {
            let path = conflicts::in_conflicts_folder(&self.ctx.layout.conflicts, &path)?;
            self.ctx
                .catalog
                .require(&system)
                .or_raise(|| ErrorKind::Catalog)
                .or_raise(|| LibraryErrorKind::Import)?;
            by_system.entry(system).or_default().push(path);
        }
        let mut summary = ImportSummary::default();
        for (system, mut paths) in by_system {
            paths.sort();
            summary.merge(self.get_rom_info_for_files(paths, Some(system)).await?);
        }
        Ok(summary)
    }

    /// Import files sitting in ROM folders that the game database does not
    /// know about, for the system owning each folder.
    #[instrument(skip_all)]
    pub async fn import_rom_directories(&self) -> LibraryResult<ImportSummary> {
        let mut summary = ImportSummary::default();
        for system in self.ctx.catalog.iter() {
            let Some(files) = self.candidate_roms(&system.id).await? else {
                continue;
            };
            // Tracks of a known cue sheet are not games of their own.
            let tracks: HashSet<PathBuf> = self.cue_tracks(&files).await.into_values().flatten().collect();
            let mut unknown = Vec::new();
            for file in files {
                if tracks.contains(&file) {
                    continue;
                }
                let known = self.ctx.games.get_by_path(&file).await.or_raise(|| LibraryErrorKind::Cache)?;
                if known.is_none() {
                    unknown.push(file);
                }
            }
            if unknown.is_empty() {
                continue;
            }
            tracing::info!(system = %system.id, files = unknown.len(), "found ROMs missing from the game database");
            summary.merge(self.get_rom_info_for_files(unknown, Some(system.id.clone())).await?);
        }
        Ok(summary)
    }

    /// [`scan::candidate_roms`], serialized against moves into the library.
    pub async fn candidate_roms(&self, system: &SystemId) -> LibraryResult<Option<Vec<PathBuf>>> {
        let system = self
            .ctx
            .catalog
            .require(system)
            .or_raise(|| ErrorKind::Catalog)
            .or_raise(|| LibraryErrorKind::Scan)?;
        let _guard = self.fs_lock.lock().await;
        scan::candidate_roms(self.ctx.backend.as_ref(), &self.ctx.layout, system).await
    }

    /// Wait for every artwork download started so far.
    pub async fn wait_for_artwork(&self) {
        self.artwork_tasks.close();
        self.artwork_tasks.wait().await;
        self.artwork_tasks.reopen();
    }

    async fn import_batch(&self, paths: Vec<PathBuf>, user_chosen: Option<&SystemId>) -> Result<ImportSummary> {
        if let Some(system) = user_chosen {
            self.ctx.catalog.require(system).or_raise(|| ErrorKind::Catalog)?;
        }
        self.initialize();

        let mut seen = HashSet::new();
        let mut paths: Vec<PathBuf> = paths.into_iter().filter(|path| seen.insert(path.clone())).collect();
        sort_import_paths(&mut paths);
        let tracks = self.cue_tracks(&paths).await;
        // Tracks travel with their sheet instead of being imported on their own.
        let travelling: HashSet<&PathBuf> = tracks.values().flatten().filter(|track| seen.contains(*track)).collect();

        let mut summary = ImportSummary::default();
        for path in &paths {
            if travelling.contains(path) {
                continue;
            }
            let Some(id) = self.claim(path, true).await else {
                continue;
            };
            let sheet_tracks = tracks.get(path).map(Vec::as_slice).unwrap_or_default();
            let mut track_ids = Vec::with_capacity(sheet_tracks.len());
            for track in sheet_tracks {
                track_ids.push(self.claim(track, false).await);
            }
            self.emit(ImportEvent::Started(path.clone()));
            let outcome = self.import_file(id, path, user_chosen, sheet_tracks).await;
            self.record(id, &track_ids, path, outcome, &mut summary).await;
        }
        tracing::info!(
            imported = summary.imported.len(),
            conflicts = summary.conflicts.len(),
            failed = summary.failed.len(),
            "import batch complete"
        );
        self.emit(ImportEvent::Completed { had_conflicts: summary.had_conflicts() });
        Ok(summary)
    }

    /// Find (or, with `create`, add) the queue item for `path` and mark it as
    /// processing. `None` if another batch is working on it or has already
    /// imported it.
    async fn claim(&self, path: &Path, create: bool) -> Option<ItemId> {
        // Moves hold this lock, so the file cannot vanish between the check
        // and the claim.
        let _guard = self.fs_lock.lock().await;
        let present = match self.ctx.backend.exists(path).await {
            Ok(present) => present,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = ?e, "could not check file");
                true
            },
        };
        match self.queue.claim_path(path, present, create).await {
            Claim::Claimed(id) => Some(id),
            Claim::Busy(id) => {
                tracing::debug!(path = %path.display(), %id, "file is already being imported");
                None
            },
            Claim::Done(id) => {
                tracing::debug!(path = %path.display(), %id, "file was already imported");
                None
            },
            Claim::Missing => None,
        }
    }

    /// Existing track files referenced by the cue sheets of a batch, per sheet.
    async fn cue_tracks(&self, paths: &[PathBuf]) -> HashMap<PathBuf, Vec<PathBuf>> {
        let mut tracks = HashMap::new();
        let sheets = paths.iter().filter(|path| path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("cue")));
        for sheet in sheets {
            let data = match self.ctx.backend.read(sheet).await {
                Ok(data) => data,
                Err(e) => {
                    tracing::debug!(path = %sheet.display(), error = ?e, "could not read cue sheet");
                    continue;
                },
            };
            let mut found = Vec::new();
            for track in cue::companion_paths(sheet, &String::from_utf8_lossy(&data)) {
                match self.ctx.backend.exists(&track).await {
                    Ok(true) => found.push(track),
                    Ok(false) => tracing::warn!(sheet = %sheet.display(), track = %track.display(), "cue sheet references a missing file"),
                    Err(e) => tracing::warn!(track = %track.display(), error = ?e, "could not check cue track"),
                }
            }
            if !found.is_empty() {
                tracks.insert(sheet.clone(), found);
            }
        }
        tracks
    }

    #[instrument(skip(self, path, user_chosen, tracks), fields(path = %path.display()))]
    async fn import_file(
        &self,
        id: ItemId,
        path: &Path,
        user_chosen: Option<&SystemId>,
        tracks: &[PathBuf],
    ) -> Result<Outcome> {
        let md5 = self.hash(path).await?;
        let file_type = match user_chosen {
            Some(_) if is_cdrom(path) => FileType::CdRom,
            Some(_) => FileType::Game,
            None => self.ctx.catalog.classify(path, Some(&md5)),
        };
        tracing::debug!(%md5, %file_type, "identified file");
        log_queue(self.queue.set_file_type(id, file_type).await);
        match file_type {
            FileType::Bios => self.import_bios(path, &md5).await,
            FileType::Artwork => self.import_artwork(path).await,
            FileType::Game | FileType::CdRom | FileType::Unknown => {
                self.import_rom(path, &md5, user_chosen, tracks).await
            },
        }
    }

    async fn hash(&self, path: &Path) -> Result<String> {
        let reader = self.ctx.backend.reader(path).await.or_raise(|| ErrorKind::Storage)?;
        tokio::task::spawn_blocking(move || romport_hash::hash_reader(reader, 0))
            .await
            .or_raise(|| ErrorKind::Task)?
            .or_raise(|| ErrorKind::Hash)
    }

    async fn import_bios(&self, path: &Path, md5: &str) -> Result<Outcome> {
        let catalog = &self.ctx.catalog;
        let entry = catalog.bios().find(path, Some(md5)).ok_or_raise(|| ErrorKind::Catalog)?;
        let system = catalog.require(&entry.system).or_raise(|| ErrorKind::Catalog)?;
        let to = self.ctx.layout.bios_dir(system).join(&entry.file_name);
        let placed = self.place(path, &to, Some(md5)).await?;
        tracing::info!(path = %placed.path().display(), system = %system.id, "imported BIOS");
        self.emit(ImportEvent::Finished { md5: md5.to_string(), was_modified: placed.is_duplicate() });
        Ok(Outcome::Filed { location: placed.into_path(), target: Some(system.id.clone()), tracks: Vec::new() })
    }

    async fn import_artwork(&self, path: &Path) -> Result<Outcome> {
        let to = destination(&self.ctx.layout.artwork, path);
        let placed = self.place(path, &to, None).await?;
        let linked = artwork::link_to_games(&self.ctx, placed.path()).await?;
        tracing::info!(path = %placed.path().display(), games = linked, "imported artwork");
        self.emit(ImportEvent::FinishedArtwork(Some(placed.path().to_path_buf())));
        Ok(Outcome::Filed { location: placed.into_path(), target: None, tracks: Vec::new() })
    }

    async fn import_rom(
        &self,
        path: &Path,
        md5: &str,
        user_chosen: Option<&SystemId>,
        tracks: &[PathBuf],
    ) -> Result<Outcome> {
        let mut candidates = match user_chosen {
            Some(system) => vec![system.clone()],
            None => self.ctx.catalog.candidates_for(path),
        };
        let mut metadata = None;
        let mut looked_up = false;
        if candidates.len() > 1 && self.ctx.options.disambiguate_by_hash {
            metadata = self.lookup(md5, path).await;
            looked_up = true;
            if let Some(system) = metadata.as_ref().and_then(|found| found.system.as_ref())
                && candidates.contains(system)
            {
                tracing::debug!(%system, "metadata lookup picked the system");
                candidates = vec![system.clone()];
            }
        }
        match candidates.as_slice() {
            [system] => {
                if !looked_up {
                    metadata = self.lookup(md5, path).await;
                }
                self.import_game(path, md5, system, tracks, metadata).await
            },
            _ => self.park_conflict(path, md5, candidates, tracks).await,
        }
    }

    /// Lookup failures only cost enrichment; the import goes on without it.
    async fn lookup(&self, md5: &str, path: &Path) -> Option<GameMetadata> {
        let file_name = path.file_name().map(|name| name.to_string_lossy()).unwrap_or_default();
        match self.ctx.lookup.lookup(md5, &file_name).await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(%md5, error = ?e, "metadata lookup failed, importing without it");
                None
            },
        }
    }

    async fn import_game(
        &self,
        path: &Path,
        md5: &str,
        system: &SystemId,
        tracks: &[PathBuf],
        metadata: Option<GameMetadata>,
    ) -> Result<Outcome> {
        let system = self.ctx.catalog.require(system).or_raise(|| ErrorKind::Catalog)?;
        let dir = self.ctx.layout.roms_dir(system);
        let placed = self.place(path, &destination(&dir, path), Some(md5)).await?;
        let tracks = self.move_tracks(tracks, &dir).await?;

        let mut game = Game::new(md5, system.id.clone(), placed.path());
        if let Some(metadata) = &metadata {
            game = game.with_metadata(metadata);
        }
        if let Some(local) = artwork::find_local(&self.ctx, &game).await? {
            game.artwork_path = Some(local);
        }
        let upserted = self.ctx.games.upsert(&game).await.or_raise(|| ErrorKind::Cache)?;
        let was_modified = placed.is_duplicate() || upserted.was_modified();
        tracing::info!(path = %game.path.display(), system = %game.system, title = %game.title, was_modified, "imported game");
        self.emit(ImportEvent::Finished { md5: game.md5.clone(), was_modified });
        let target = Some(game.system.clone());
        self.spawn_artwork_download(game);
        Ok(Outcome::Filed { location: placed.into_path(), target, tracks })
    }

    async fn park_conflict(
        &self,
        path: &Path,
        md5: &str,
        candidates: Vec<SystemId>,
        tracks: &[PathBuf],
    ) -> Result<Outcome> {
        let dir = &self.ctx.layout.conflicts;
        let placed = self.place(path, &destination(dir, path), Some(md5)).await?;
        let tracks = self.move_tracks(tracks, dir).await?;
        tracing::info!(path = %placed.path().display(), ?candidates, "no single system matches, waiting for the user");
        Ok(Outcome::Conflict { location: placed.into_path(), candidates, tracks })
    }

    async fn move_tracks(&self, tracks: &[PathBuf], dir: &Path) -> Result<Vec<PathBuf>> {
        let mut moved = Vec::with_capacity(tracks.len());
        for track in tracks {
            let to = destination(dir, track);
            let placed = self.place(track, &to, None).await?;
            if placed.path() != to {
                tracing::warn!(track = %track.display(), stored = %placed.path().display(), "track renamed, its cue sheet no longer matches");
            }
            moved.push(placed.into_path());
        }
        Ok(moved)
    }

    /// Move `from` to `to` without clobbering anything.
    ///
    /// Identical content at the destination makes the incoming file redundant
    /// and it is deleted. Different content gets the next free `name (n).ext`.
    async fn place(&self, from: &Path, to: &Path, md5: Option<&str>) -> Result<Placed> {
        let _guard = self.fs_lock.lock().await;
        if from == to {
            return Ok(Placed::Moved(to.to_path_buf()));
        }
        let mut incoming = md5.map(str::to_string);
        let mut candidate = to.to_path_buf();
        for attempt in 2..=MAX_NAME_ATTEMPTS + 1 {
            match self.ctx.backend.stat(&candidate).await {
                Err(e) if matches!(&*e, StorageErrorKind::NotFound(_)) => {
                    self.ctx.backend.rename(from, &candidate).await.or_raise(|| ErrorKind::Storage)?;
                    tracing::debug!(from = %from.display(), to = %candidate.display(), "moved file");
                    return Ok(Placed::Moved(candidate));
                },
                Err(e) => return Err(e).or_raise(|| ErrorKind::Storage),
                Ok(_) => {
                    if incoming.is_none() {
                        incoming = Some(self.hash(from).await?);
                    }
                    let existing = self.hash(&candidate).await?;
                    if incoming.as_deref() == Some(existing.as_str()) {
                        self.ctx.backend.delete(from).await.or_raise(|| ErrorKind::Storage)?;
                        tracing::debug!(from = %from.display(), existing = %candidate.display(), "removed duplicate");
                        return Ok(Placed::Duplicate(candidate));
                    }
                    candidate = numbered(to, attempt);
                },
            }
        }
        exn::bail!(ErrorKind::NameExhausted(to.to_path_buf()))
    }

    fn spawn_artwork_download(&self, game: Game) {
        if !self.ctx.options.download_artwork || game.artwork_path.is_some() {
            return;
        }
        let (Some(fetcher), Some(url)) = (self.fetcher.clone(), game.artwork_url.clone()) else {
            return;
        };
        let ctx = self.ctx.clone();
        let events = self.events.clone();
        let span = tracing::info_span!("artwork", md5 = %game.md5);
        self.artwork_tasks.spawn(
            async move {
                let stored = match artwork::download(&ctx, fetcher.as_ref(), &game, &url).await {
                    Ok(path) => Some(path),
                    Err(e) => {
                        tracing::warn!(error = ?e, "artwork download failed");
                        None
                    },
                };
                _ = events.send(ImportEvent::FinishedArtwork(stored));
            }
            .instrument(span),
        );
    }

    /// Mirror a file's outcome into the queue and the batch summary.
    async fn record(
        &self,
        id: ItemId,
        track_ids: &[Option<ItemId>],
        path: &Path,
        outcome: Result<Outcome>,
        summary: &mut ImportSummary,
    ) {
        match outcome {
            Ok(Outcome::Filed { location, target, tracks }) => {
                summary.imported.push(location.clone());
                log_queue(self.queue.complete(id, Some(location), target.clone()).await);
                for (track, location) in track_ids.iter().zip(tracks) {
                    if let Some(track) = track {
                        log_queue(self.queue.set_file_type(*track, FileType::CdRom).await);
                        log_queue(self.queue.complete(*track, Some(location), target.clone()).await);
                    }
                }
            },
            Ok(Outcome::Conflict { location, candidates, tracks }) => {
                summary.conflicts.push(location.clone());
                log_queue(self.queue.conflict(id, candidates.clone(), location).await);
                for (track, location) in track_ids.iter().zip(tracks) {
                    if let Some(track) = track {
                        log_queue(self.queue.conflict(*track, candidates.clone(), location).await);
                    }
                }
            },
            Err(e) => {
                tracing::warn!(path = %path.display(), error = ?e, "import failed");
                summary.failed.push(path.to_path_buf());
                let reason = (*e).to_string();
                log_queue(self.queue.fail(id, reason.clone()).await);
                for track in track_ids.iter().flatten() {
                    log_queue(self.queue.fail(*track, reason.clone()).await);
                }
            },
        }
    }
}

fn log_queue<T>(result: crate::queue::error::Result<T>) {
    if let Err(e) = result {
        tracing::warn!(error = ?e, "could not update import queue");
    }
}
