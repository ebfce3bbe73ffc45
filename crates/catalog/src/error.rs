//! Catalog Error Types

use derive_more::{Display, Error};

use crate::SystemId;

/// A catalog error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for catalog operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Two system definitions share an identifier.
    #[display("duplicate system identifier: {_0}")]
    DuplicateSystem(#[error(not(source))] SystemId),
    /// A system was defined without any file extensions, so nothing could
    /// ever be imported into it.
    #[display("system {_0} recognizes no file extensions")]
    NoExtensions(#[error(not(source))] SystemId),
    /// A system identifier does not exist in the catalog.
    #[display("unknown system: {_0}")]
    UnknownSystem(#[error(not(source))] SystemId),
    /// A BIOS entry points at a system that is not in the catalog.
    #[display("BIOS file {file_name} belongs to unknown system {system}")]
    OrphanBios { file_name: String, system: SystemId },
    /// The metadata lookup service could not answer.
    #[display("metadata lookup failed: {_0}")]
    Lookup(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        // Catalog definitions are static; only the lookup service is remote.
        matches!(self, Self::Lookup(_))
    }
}
