//! Import directory watcher.
//!
//! The [`DirectoryWatcher`] follows the top level of the import directory.
//! Archives that appear there are left alone until they stop changing (a
//! browser or a network copy writes them in pieces), then extracted next to
//! themselves and deleted. Plain files are not its business: the controller
//! hands them to the importer.
//!
//! Once every archive in the directory has been dealt with, the watcher
//! reports the accumulated extracted files in one
//! [`AllExtracted`](WatchEvent::AllExtracted) so they can be imported as a
//! single batch.

pub mod error;

use crate::watch::error::{ErrorKind, Result};
use exn::ResultExt;
use notify::event::ModifyKind;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use romport_compress::{Archive, is_archive};
use romport_config::WatcherConfig;
use romport_storage::is_hidden;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Progress of archive extraction. Paths are relative to the library root.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    Started { path: PathBuf },
    /// `progress` is in `[0, 1]`.
    Updated { path: PathBuf, progress: f32 },
    /// `extracted` is `None` when extraction failed; the archive is then
    /// left in place.
    Completed { path: PathBuf, extracted: Option<Vec<PathBuf>> },
    /// Every archive in the directory is done. Carries the files extracted
    /// since the last `AllExtracted`, never empty.
    AllExtracted(Vec<PathBuf>),
}

type Extraction = (PathBuf, std::result::Result<romport_compress::error::Result<Vec<PathBuf>>, JoinError>);

/// Watches one directory for archives. Stops when dropped.
pub struct DirectoryWatcher {
    // Notifications stop when this is dropped.
    _watcher: RecommendedWatcher,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl DirectoryWatcher {
    /// Watch `dir` (relative to the absolute library `root`).
    ///
    /// Archives already in the directory are extracted right away. Must be
    /// called from within a Tokio runtime.
    #[tracing::instrument(skip(root, config), fields(dir = %dir.display()))]
    pub async fn start(
        root: &Path,
        dir: &Path,
        config: &WatcherConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<WatchEvent>)> {
        let absolute = root.join(dir);
        let is_dir = tokio::fs::metadata(&absolute).await.is_ok_and(|meta| meta.is_dir());
        if !is_dir {
            exn::bail!(ErrorKind::MissingDirectory(absolute));
        }

        let (fs_tx, fs_rx) = mpsc::unbounded_channel();
        let mut watcher = RecommendedWatcher::new(
            move |result| {
                if fs_tx.send(result).is_err() {
                    tracing::trace!("file system event after the watcher stopped");
                }
            },
            Config::default(),
        )
        .or_raise(|| ErrorKind::Notify)?;
        watcher.watch(&absolute, RecursiveMode::NonRecursive).or_raise(|| ErrorKind::Notify)?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        let state = WatchLoop {
            root: root.to_path_buf(),
            dir: dir.to_path_buf(),
            absolute,
            stabilization: config.stabilization(),
            tick: config.tick(),
            events: events_tx,
            pending: HashMap::new(),
            running: HashSet::new(),
            settled: HashSet::new(),
            extracted: Vec::new(),
            extractions: JoinSet::new(),
            progress_tx,
            progress_rx,
        };
        let cancel = CancellationToken::new();
        let task = tokio::spawn(state.run(fs_rx, cancel.clone()).in_current_span());
        tracing::info!("watching import directory");
        Ok((Self { _watcher: watcher, cancel, task: Some(task) }, events_rx))
    }

    /// Stop watching and wait for the watcher to wind down. Extractions in
    /// flight are abandoned.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            tracing::warn!(error = %e, "directory watcher did not stop cleanly");
        }
    }
}

impl Drop for DirectoryWatcher {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct WatchLoop {
    root: PathBuf,
    /// Relative to `root`.
    dir: PathBuf,
    absolute: PathBuf,
    stabilization: Duration,
    tick: Duration,
    events: mpsc::UnboundedSender<WatchEvent>,
    /// Archives waiting to stop changing, with the time of their last change.
    pending: HashMap<PathBuf, Instant>,
    running: HashSet<PathBuf>,
    /// Archives that failed to extract or could not be deleted. They stay
    /// put until they change again.
    settled: HashSet<PathBuf>,
    extracted: Vec<PathBuf>,
    extractions: JoinSet<Extraction>,
    progress_tx: mpsc::UnboundedSender<(PathBuf, f32)>,
    progress_rx: mpsc::UnboundedReceiver<(PathBuf, f32)>,
}

impl WatchLoop {
    async fn run(mut self, mut fs_events: mpsc::UnboundedReceiver<notify::Result<Event>>, cancel: CancellationToken) {
        self.sweep().await;
        let mut tick = tokio::time::interval(self.tick);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                Some(result) = fs_events.recv() => match result {
                    Ok(event) => self.on_fs_event(event),
                    Err(e) => tracing::warn!(error = %e, "file system notification error"),
                },
                Some((path, progress)) = self.progress_rx.recv() => {
                    self.send(WatchEvent::Updated { path, progress });
                },
                Some(joined) = self.extractions.join_next(), if !self.extractions.is_empty() => match joined {
                    Ok((path, result)) => self.on_finished(path, result).await,
                    // Only cancellation gets here; the blocking work reports its own panics.
                    Err(e) => tracing::debug!(error = %e, "extraction task cancelled"),
                },
                _ = tick.tick() => self.on_tick().await,
            }
        }
        self.extractions.shutdown().await;
        tracing::debug!("directory watcher stopped");
    }

    fn send(&self, event: WatchEvent) {
        // Nobody listening is fine.
        _ = self.events.send(event);
    }

    /// Archives present before the watcher started count as stable.
    async fn sweep(&mut self) {
        let stable_since = Instant::now().checked_sub(self.stabilization).unwrap_or_else(Instant::now);
        for path in self.archives().await {
            self.pending.insert(path, stable_since);
        }
    }

    /// Top-level, visible archives currently in the directory.
    async fn archives(&self) -> Vec<PathBuf> {
        let mut found = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.absolute).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(error = %e, "could not list import directory");
                return found;
            },
        };
        loop {
            match entries.next_entry().await {
                Ok(Some(entry)) => {
                    let is_file = entry.file_type().await.is_ok_and(|t| t.is_file());
                    if is_file && let Some(path) = self.archive_path(&entry.path()) {
                        found.push(path);
                    }
                },
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "could not list import directory");
                    break;
                },
            }
        }
        found.sort();
        found
    }

    /// The root-relative path of `absolute` if it is a visible archive
    /// directly inside the watched directory.
    fn archive_path(&self, absolute: &Path) -> Option<PathBuf> {
        let name = absolute.strip_prefix(&self.absolute).ok()?;
        if name.components().count() != 1 || is_hidden(name) || !is_archive(name) {
            return None;
        }
        Some(self.dir.join(name))
    }

    fn on_fs_event(&mut self, event: Event) {
        for absolute in &event.paths {
            let Some(path) = self.archive_path(absolute) else {
                continue;
            };
            match event.kind {
                EventKind::Modify(ModifyKind::Metadata(_)) => {},
                EventKind::Create(_) | EventKind::Modify(_) => {
                    if self.running.contains(&path) {
                        continue;
                    }
                    tracing::trace!(path = %path.display(), "archive changed");
                    self.settled.remove(&path);
                    self.pending.insert(path, Instant::now());
                },
                EventKind::Remove(_) => {
                    self.pending.remove(&path);
                    self.settled.remove(&path);
                },
                _ => {},
            }
        }
    }

    async fn on_tick(&mut self) {
        let now = Instant::now();
        let mut stable: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|(_, changed)| now.duration_since(**changed) >= self.stabilization)
            .map(|(path, _)| path.clone())
            .collect();
        stable.sort();
        for path in stable {
            self.pending.remove(&path);
            // Renamed or deleted before it settled.
            if !tokio::fs::try_exists(self.root.join(&path)).await.unwrap_or(false) {
                continue;
            }
            self.start_extraction(path);
        }
    }

    fn start_extraction(&mut self, path: PathBuf) {
        let Some(archive) = Archive::from_path(&path) else {
            return;
        };
        tracing::info!(path = %path.display(), format = %archive, "extracting archive");
        self.send(WatchEvent::Started { path: path.clone() });
        self.running.insert(path.clone());
        let source = self.root.join(&path);
        let destination = self.absolute.clone();
        let progress = self.progress_tx.clone();
        let reported = path.clone();
        self.extractions.spawn(
            async move {
                let result = tokio::task::spawn_blocking(move || -> romport_compress::error::Result<Vec<PathBuf>> {
                    // The name only nominates the file; its content picks the format.
                    let archive = Archive::detect(&source)?.unwrap_or(archive);
                    archive.extract(&source, &destination, |p| {
                        _ = progress.send((reported.clone(), p));
                    })
                })
                .await;
                (path, result)
            }
            .in_current_span(),
        );
    }

    async fn on_finished(
        &mut self,
        path: PathBuf,
        result: std::result::Result<romport_compress::error::Result<Vec<PathBuf>>, JoinError>,
    ) {
        // Progress of this archive must not trail its completion.
        while let Ok((path, progress)) = self.progress_rx.try_recv() {
            self.send(WatchEvent::Updated { path, progress });
        }
        self.running.remove(&path);

        let files = match result {
            Ok(Ok(files)) => files,
            Ok(Err(e)) => {
                tracing::warn!(path = %path.display(), error = ?e, "could not extract archive");
                self.settled.insert(path.clone());
                self.send(WatchEvent::Completed { path, extracted: None });
                self.all_extracted().await;
                return;
            },
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "archive extraction panicked");
                self.settled.insert(path.clone());
                self.send(WatchEvent::Completed { path, extracted: None });
                self.all_extracted().await;
                return;
            },
        };
        let files: Vec<PathBuf> =
            files.into_iter().filter_map(|file| file.strip_prefix(&self.root).ok().map(Path::to_path_buf)).collect();
        if let Err(e) = tokio::fs::remove_file(self.root.join(&path)).await {
            tracing::warn!(path = %path.display(), error = %e, "could not delete extracted archive");
            self.settled.insert(path.clone());
        }
        tracing::info!(path = %path.display(), files = files.len(), "archive extracted");
        self.send(WatchEvent::Completed { path, extracted: Some(files.clone()) });
        self.extracted.extend(files);
        self.all_extracted().await;
    }

    /// Report the accumulated files once no archive is left to extract.
    async fn all_extracted(&mut self) {
        if !self.running.is_empty() || !self.pending.is_empty() || self.extracted.is_empty() {
            return;
        }
        let waiting = self.archives().await.into_iter().any(|path| !self.settled.contains(&path));
        if waiting {
            return;
        }
        // Nested archives are extracted on their own.
        let files: Vec<PathBuf> = std::mem::take(&mut self.extracted).into_iter().filter(|f| !is_archive(f)).collect();
        if !files.is_empty() {
            self.send(WatchEvent::AllExtracted(files));
        }
    }
}
