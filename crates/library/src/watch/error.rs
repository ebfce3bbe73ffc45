//! Error types for the [`watch`](super) module.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A watcher error with automatic location tracking via [`exn::Exn`].
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for watcher operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("file system notifications are unavailable")]
    Notify,
    #[display("watched directory does not exist: {}", _0.display())]
    MissingDirectory(#[error(not(source))] PathBuf),
    #[display("could not extract archive")]
    Extract,
    #[display("I/O error")]
    Io,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io)
    }
}
