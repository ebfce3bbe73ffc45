//! Error types for the [`queue`](super) module.

use derive_more::{Display, Error};

use crate::queue::{ImportStatus, ItemId};

/// A queue error with automatic location tracking via [`exn::Exn`].
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for queue operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Queue misuse. None of these are retryable: they describe a request that
/// does not fit the current state of the queue.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    #[display("no queue item {_0}")]
    UnknownItem(#[error(not(source))] ItemId),
    #[display("item {id} cannot go from {from} to {to}")]
    InvalidTransition { id: ItemId, from: ImportStatus, to: ImportStatus },
    /// Games and disc images only succeed once a system is known.
    #[display("item {_0} cannot succeed without a target system")]
    MissingTarget(#[error(not(source))] ItemId),
    /// A single candidate is an import, not a conflict.
    #[display("item {_0} has exactly one candidate system")]
    NotAConflict(#[error(not(source))] ItemId),
    #[display("item {_0} cannot be nested under itself")]
    Cycle(#[error(not(source))] ItemId),
    #[display("item {_0} or one of its children is still pending")]
    Unfinished(#[error(not(source))] ItemId),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        false
    }
}
