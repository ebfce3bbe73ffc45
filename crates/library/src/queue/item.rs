use derive_more::Display;
use romport_catalog::{FileType, SystemId};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Stable identifier of a queue item. Never reused within a queue.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[display("#{_0}")]
pub struct ItemId(pub(crate) u64);

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ImportStatus {
    #[default]
    #[display("queued")]
    Queued,
    #[display("processing")]
    Processing,
    #[display("success")]
    Success,
    #[display("failure")]
    Failure,
    /// Waiting for the user to pick a system.
    #[display("conflict")]
    Conflict,
}
impl ImportStatus {
    /// Success and failure are final until the item is acknowledged.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failure)
    }
}

/// One file or archive moving through the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportItem {
    pub id: ItemId,
    /// Where the file was discovered, relative to the library root.
    pub source: PathBuf,
    /// Where the file lives now. Starts out equal to `source` and follows the
    /// file into the ROM, BIOS, artwork or conflicts folder.
    pub location: PathBuf,
    pub file_type: FileType,
    pub status: ImportStatus,
    /// Files extracted from this item, in extraction order.
    pub children: Vec<ItemId>,
    pub parent: Option<ItemId>,
    /// Systems the file could belong to. Only meaningful for conflicts.
    pub candidates: Vec<SystemId>,
    pub target: Option<SystemId>,
    /// Why the item failed.
    pub error: Option<String>,
}
impl ImportItem {
    pub(crate) fn new(id: ItemId, source: PathBuf, file_type: FileType) -> Self {
        Self {
            id,
            location: source.clone(),
            source,
            file_type,
            status: ImportStatus::Queued,
            children: Vec::new(),
            parent: None,
            candidates: Vec::new(),
            target: None,
            error: None,
        }
    }

    pub fn matches_path(&self, path: &Path) -> bool {
        self.source == path || self.location == path
    }
}

/// Immutable view of the whole queue.
///
/// Items are stored in an arena keyed by [`ItemId`]; the tree shape lives in
/// `roots` and each item's `children`.
#[derive(Debug, Clone, Default)]
pub struct QueueSnapshot {
    pub(crate) roots: Vec<ItemId>,
    pub(crate) items: HashMap<ItemId, ImportItem>,
}
impl QueueSnapshot {
    pub fn get(&self, id: ItemId) -> Option<&ImportItem> {
        self.items.get(&id)
    }

    /// Top-level items in discovery order.
    pub fn roots(&self) -> impl Iterator<Item = &ImportItem> {
        self.roots.iter().filter_map(|id| self.items.get(id))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Depth-first walk in display order, paired with nesting depth.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &ImportItem)> {
        let mut stack: Vec<(usize, ItemId)> = self.roots.iter().rev().map(|id| (0, *id)).collect();
        std::iter::from_fn(move || {
            loop {
                let (depth, id) = stack.pop()?;
                if let Some(item) = self.items.get(&id) {
                    stack.extend(item.children.iter().rev().map(|child| (depth + 1, *child)));
                    return Some((depth, item));
                }
            }
        })
    }

    /// First item (in display order) discovered at or currently living at `path`.
    pub fn find_by_path(&self, path: impl AsRef<Path>) -> Option<&ImportItem> {
        let path = path.as_ref();
        self.iter().map(|(_, item)| item).find(|item| item.matches_path(path))
    }

    pub fn conflicts(&self) -> impl Iterator<Item = &ImportItem> {
        self.iter().map(|(_, item)| item).filter(|item| item.status == ImportStatus::Conflict)
    }

    /// Whether the item and everything below it reached a final status.
    pub(crate) fn is_settled(&self, id: ItemId) -> bool {
        self.items.get(&id).is_some_and(|item| {
            item.status.is_terminal() && item.children.iter().all(|child| self.is_settled(*child))
        })
    }

    pub(crate) fn is_ancestor(&self, ancestor: ItemId, mut id: ItemId) -> bool {
        while let Some(parent) = self.items.get(&id).and_then(|item| item.parent) {
            if parent == ancestor {
                return true;
            }
            id = parent;
        }
        false
    }

    /// Unlink an item from its parent (or the roots) without deleting it.
    pub(crate) fn detach(&mut self, id: ItemId) {
        let parent = self.items.get_mut(&id).and_then(|item| item.parent.take());
        match parent.and_then(|parent| self.items.get_mut(&parent)) {
            Some(parent) => parent.children.retain(|child| *child != id),
            None => self.roots.retain(|root| *root != id),
        }
    }

    /// Delete an item and its whole subtree.
    pub(crate) fn remove_tree(&mut self, id: ItemId) -> Option<ImportItem> {
        self.detach(id);
        let item = self.items.remove(&id)?;
        let mut pending = item.children.clone();
        while let Some(child) = pending.pop() {
            if let Some(removed) = self.items.remove(&child) {
                pending.extend(removed.children);
            }
        }
        Some(item)
    }
}
