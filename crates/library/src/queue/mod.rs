//! Import queue.
//!
//! An ordered arena of [`ImportItem`]s shared by the importer, the controller
//! and the UI. Every mutation goes through one lock and publishes a fresh
//! [`QueueSnapshot`], so observers never see a half-applied update and never
//! need to touch the lock themselves.
//!
//! Status transitions:
//!
//! ```text
//! queued ──► processing ──► success
//!   ▲            │  │
//!   │            │  └─────► failure ──┐
//!   │            ▼                    │
//!   └──────── conflict ◄──────────────┘  (re-processed on resolve/retry)
//! ```

pub mod error;
mod item;

pub use self::item::{ImportItem, ImportStatus, ItemId, QueueSnapshot};
use crate::queue::error::{ErrorKind, Result};
use exn::OptionExt;
use romport_catalog::{FileType, SystemId};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, watch};

/// Result of [`ImportQueue::claim_path`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// The item is now processing on behalf of the caller.
    Claimed(ItemId),
    /// Another batch is processing the path.
    Busy(ItemId),
    /// The path was imported from this source already and the file is gone.
    Done(ItemId),
    /// Nothing to claim, and the caller did not ask for a new item.
    Missing,
}

pub struct ImportQueue {
    state: Mutex<QueueSnapshot>,
    next_id: AtomicU64,
    published: watch::Sender<Arc<QueueSnapshot>>,
}

impl Default for ImportQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ImportQueue {
    pub fn new() -> Self {
        let (published, _) = watch::channel(Arc::new(QueueSnapshot::default()));
        Self { state: Mutex::new(QueueSnapshot::default()), next_id: AtomicU64::new(1), published }
    }

    /// The queue as of the last completed update.
    pub fn snapshot(&self) -> Arc<QueueSnapshot> {
        self.published.borrow().clone()
    }

    /// Receive a new snapshot after every update.
    pub fn subscribe(&self) -> watch::Receiver<Arc<QueueSnapshot>> {
        self.published.subscribe()
    }

    /// Apply `f` under the lock and publish the result if it succeeded.
    ///
    /// `f` must validate before it mutates: a failed update is not rolled
    /// back.
    async fn update<T>(&self, f: impl FnOnce(&mut QueueSnapshot) -> Result<T>) -> Result<T> {
        let mut state = self.state.lock().await;
        let value = f(&mut state)?;
        self.publish(&state);
        Ok(value)
    }

    fn publish(&self, state: &QueueSnapshot) {
        self.published.send_replace(Arc::new(state.clone()));
    }

    fn allocate(&self) -> ItemId {
        ItemId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Append a top-level item.
    pub async fn push(&self, source: impl Into<PathBuf>, file_type: FileType) -> ItemId {
        let id = self.allocate();
        let mut state = self.state.lock().await;
        state.roots.push(id);
        state.items.insert(id, ImportItem::new(id, source.into(), file_type));
        self.publish(&state);
        id
    }

    /// Append an item nested under `parent`.
    pub async fn push_child(&self, parent: ItemId, source: impl Into<PathBuf>, file_type: FileType) -> Result<ItemId> {
        let id = self.allocate();
        let mut item = ImportItem::new(id, source.into(), file_type);
        item.parent = Some(parent);
        self.update(|state| {
            let parent_item = state.items.get_mut(&parent).ok_or_raise(|| ErrorKind::UnknownItem(parent))?;
            parent_item.children.push(id);
            state.items.insert(id, item);
            Ok(id)
        })
        .await
    }

    /// Move existing items under `parent`, after its current children.
    ///
    /// Used when an archive's extracted files were discovered on their own
    /// before the archive finished.
    pub async fn attach_children(&self, parent: ItemId, children: &[ItemId]) -> Result<()> {
        self.update(|state| {
            if !state.items.contains_key(&parent) {
                exn::bail!(ErrorKind::UnknownItem(parent));
            }
            for child in children {
                if !state.items.contains_key(child) {
                    exn::bail!(ErrorKind::UnknownItem(*child));
                }
                if *child == parent || state.is_ancestor(*child, parent) {
                    exn::bail!(ErrorKind::Cycle(*child));
                }
            }
            for child in children {
                state.detach(*child);
                if let Some(item) = state.items.get_mut(child) {
                    item.parent = Some(parent);
                }
                if let Some(item) = state.items.get_mut(&parent) {
                    item.children.push(*child);
                }
            }
            Ok(())
        })
        .await
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    pub fn find(&self, id: ItemId) -> Option<ImportItem> {
        self.snapshot().get(id).cloned()
    }

    pub fn find_by_path(&self, path: impl AsRef<Path>) -> Option<ImportItem> {
        self.snapshot().find_by_path(path).cloned()
    }

    /// Find the unfinished item for `path` and mark it as processing, in one
    /// step under the queue lock.
    ///
    /// Items that already succeeded are never reclaimed. If one of them was
    /// imported from `path` and the file is no longer `present`, the path is
    /// [`Done`](Claim::Done). Otherwise, with `create`, a new item is appended
    /// and claimed.
    pub async fn claim_path(&self, path: &Path, present: bool, create: bool) -> Claim {
        use ImportStatus::*;
        let mut state = self.state.lock().await;
        let open = state
            .iter()
            .map(|(_, item)| item)
            .find(|item| item.matches_path(path) && item.status != Success)
            .map(|item| (item.id, item.status));
        let id = match open {
            Some((id, Processing)) => return Claim::Busy(id),
            Some((id, _)) => {
                if let Some(item) = state.items.get_mut(&id) {
                    item.status = Processing;
                    item.error = None;
                }
                id
            },
            None => {
                let done = state.iter().map(|(_, item)| item).find(|item| item.source == path).map(|item| item.id);
                match done {
                    Some(id) if !present => return Claim::Done(id),
                    _ if !create => return Claim::Missing,
                    _ => {
                        let id = self.allocate();
                        let mut item = ImportItem::new(id, path.to_path_buf(), FileType::Unknown);
                        item.status = Processing;
                        state.roots.push(id);
                        state.items.insert(id, item);
                        id
                    },
                }
            },
        };
        self.publish(&state);
        Claim::Claimed(id)
    }

    /// Items waiting for the user to pick a system, in display order.
    pub fn conflicts(&self) -> Vec<ImportItem> {
        self.snapshot().conflicts().cloned().collect()
    }

    /// Apply `f` to one item after checking it is in one of the `from` states.
    async fn transition(
        &self,
        id: ItemId,
        from: &[ImportStatus],
        to: ImportStatus,
        f: impl FnOnce(&mut ImportItem) -> Result<()>,
    ) -> Result<()> {
        self.update(|state| {
            let item = state.items.get_mut(&id).ok_or_raise(|| ErrorKind::UnknownItem(id))?;
            if !from.contains(&item.status) {
                exn::bail!(ErrorKind::InvalidTransition { id, from: item.status, to });
            }
            f(item)?;
            item.status = to;
            Ok(())
        })
        .await
    }

    /// Start (or restart, for conflicts and failures) processing an item.
    pub async fn mark_processing(&self, id: ItemId) -> Result<()> {
        use ImportStatus::*;
        self.transition(id, &[Queued, Conflict, Failure], Processing, |item| {
            item.error = None;
            Ok(())
        })
        .await
    }

    pub async fn set_file_type(&self, id: ItemId, file_type: FileType) -> Result<()> {
        self.update(|state| {
            let item = state.items.get_mut(&id).ok_or_raise(|| ErrorKind::UnknownItem(id))?;
            item.file_type = file_type;
            Ok(())
        })
        .await
    }

    /// Record that the file was filed at `location` for `target`.
    ///
    /// Games, disc images and BIOS files need a target; artwork and archives
    /// do not.
    pub async fn complete(&self, id: ItemId, location: Option<PathBuf>, target: Option<SystemId>) -> Result<()> {
        self.transition(id, &[ImportStatus::Processing], ImportStatus::Success, |item| {
            let is_leaf = item.children.is_empty();
            if is_leaf && item.file_type.requires_system() && target.is_none() {
                exn::bail!(ErrorKind::MissingTarget(id));
            }
            if let Some(location) = location {
                item.location = location;
            }
            item.target = target;
            item.candidates.clear();
            Ok(())
        })
        .await
    }

    /// Park the item until the user picks one of `candidates`.
    pub async fn conflict(&self, id: ItemId, candidates: Vec<SystemId>, location: PathBuf) -> Result<()> {
        if candidates.len() == 1 {
            exn::bail!(ErrorKind::NotAConflict(id));
        }
        self.transition(id, &[ImportStatus::Processing], ImportStatus::Conflict, |item| {
            item.candidates = candidates;
            item.location = location;
            item.target = None;
            Ok(())
        })
        .await
    }

    pub async fn fail(&self, id: ItemId, reason: impl Into<String>) -> Result<()> {
        use ImportStatus::*;
        let reason = reason.into();
        self.transition(id, &[Queued, Processing], Failure, |item| {
            item.error = Some(reason);
            Ok(())
        })
        .await
    }

    /// Drop a finished item (and its finished children) from the queue.
    pub async fn acknowledge(&self, id: ItemId) -> Result<ImportItem> {
        self.update(|state| {
            if !state.items.contains_key(&id) {
                exn::bail!(ErrorKind::UnknownItem(id));
            }
            if !state.is_settled(id) {
                exn::bail!(ErrorKind::Unfinished(id));
            }
            state.remove_tree(id).ok_or_raise(|| ErrorKind::UnknownItem(id))
        })
        .await
    }

    /// Acknowledge every settled top-level item. Returns how many were removed.
    pub async fn clear_finished(&self) -> usize {
        let mut state = self.state.lock().await;
        let settled: Vec<ItemId> = state.roots.iter().copied().filter(|id| state.is_settled(*id)).collect();
        if settled.is_empty() {
            return 0;
        }
        for id in &settled {
            state.remove_tree(*id);
        }
        self.publish(&state);
        settled.len()
    }

    /// Remove an item that is not being processed, whatever its status.
    pub async fn remove(&self, id: ItemId) -> Result<ImportItem> {
        self.update(|state| {
            let item = state.items.get(&id).ok_or_raise(|| ErrorKind::UnknownItem(id))?;
            if item.status == ImportStatus::Processing {
                exn::bail!(ErrorKind::Unfinished(id));
            }
            state.remove_tree(id).ok_or_raise(|| ErrorKind::UnknownItem(id))
        })
        .await
    }
}
