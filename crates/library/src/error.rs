//! Library Error Types
//!
//! Each pipeline stage ([`queue`](crate::queue), [`import`](crate::import),
//! [`watch`](crate::watch)) carries its own error kind; the public entry
//! points re-raise them into [`ErrorKind`] so callers only match on one enum
//! and can still walk the error tree for details.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A library error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("import queue update failed")]
    Queue,
    #[display("import failed")]
    Import,
    #[display("directory watcher failed")]
    Watch,
    #[display("could not list conflicts")]
    Conflict,
    #[display("could not scan ROM directory")]
    Scan,
    /// The pipeline has no directory to watch; nothing can be imported.
    #[display("import directory does not exist: {}", _0.display())]
    MissingImportDirectory(#[error(not(source))] PathBuf),
    #[display("storage operation failed")]
    Storage,
    #[display("game database operation failed")]
    Cache,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Cache | Self::Storage)
    }
}
