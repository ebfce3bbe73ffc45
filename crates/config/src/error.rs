//! Configuration Error Types

use derive_more::{Display, Error};
use romport_catalog::SystemId;
use std::path::PathBuf;

/// A configuration error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for configuration operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// A configuration source could not be read or did not match the schema.
    #[display("could not load configuration: {_0}")]
    Load(#[error(not(source))] String),
    /// The library root must be an absolute path.
    #[display("library root must be absolute: {}", _0.display())]
    RelativeRoot(#[error(not(source))] PathBuf),
    /// Layout folders are relative to the library root and must not escape it.
    #[display("invalid library layout entry `{name}`: {}", path.display())]
    InvalidLayout { name: &'static str, path: PathBuf },
    /// Two layout folders resolve to the same place.
    #[display("layout entries `{_0}` and `{_1}` overlap")]
    OverlappingLayout(#[error(not(source))] &'static str, #[error(not(source))] &'static str),
    /// A system claims an extension reserved for archives, which would be
    /// extracted before the importer ever saw it.
    #[display("system {system} claims archive extension .{extension}")]
    ArchiveExtension { system: SystemId, extension: String },
    /// System or BIOS definitions are inconsistent.
    #[display("invalid system definitions")]
    InvalidSystems,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        // Configuration is fixed until the user edits it.
        false
    }
}
