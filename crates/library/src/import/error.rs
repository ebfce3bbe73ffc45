//! Error types for the [`import`](super) module.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// An import error with automatic location tracking via [`exn::Exn`].
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for import operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Classifies the origin of an import failure.
///
/// ### Operational Errors
/// - [`ErrorKind::NameExhausted`]
/// - [`ErrorKind::Catalog`]
///
/// ### Dependency Errors
/// - [`ErrorKind::Storage`]
/// - [`ErrorKind::Hash`]
/// - [`ErrorKind::Cache`]
/// - [`ErrorKind::Artwork`]
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// A storage backend operation (stat, read, rename, delete) failed.
    #[display("storage operation failed")]
    Storage,
    /// The content digest could not be computed.
    #[display("could not hash file")]
    Hash,
    /// A game database update via [`romport_cache::Repository`] failed.
    #[display("game database update failed")]
    Cache,
    /// The requested system is not in the catalog.
    #[display("unknown system")]
    Catalog,
    /// Every `name (n).ext` candidate at the destination is taken by a
    /// different file.
    #[display("no free file name left for {}", _0.display())]
    NameExhausted(#[error(not(source))] PathBuf),
    /// Artwork could not be downloaded.
    #[display("artwork download failed")]
    Artwork,
    /// A blocking worker panicked or was cancelled.
    #[display("background task failed")]
    Task,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Cache | Self::Artwork)
    }
}
