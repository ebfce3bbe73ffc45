//! Hashing Error Types

use derive_more::{Display, Error};
use std::io::{Error as IoError, ErrorKind as IoErrorKind};
use std::path::PathBuf;

/// A hashing error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for hashing operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("file not found: {}", _0.display())]
    NotFound(#[error(not(source))] PathBuf),
    #[display("permission denied: {}", _0.display())]
    PermissionDenied(#[error(not(source))] PathBuf),
    /// The starting offset lies beyond the end of the input.
    #[display("offset {offset} is past the end of input ({len} bytes)")]
    OffsetOutOfRange { offset: u64, len: u64 },
    #[display("I/O error: {_0}")]
    Io(IoError),
    /// The blocking hashing task could not be joined (it panicked).
    #[display("hashing task failed")]
    Task,
}

impl ErrorKind {
    pub(crate) fn from_io(err: IoError, path: impl Into<PathBuf>) -> Self {
        match err.kind() {
            IoErrorKind::NotFound => Self::NotFound(path.into()),
            IoErrorKind::PermissionDenied => Self::PermissionDenied(path.into()),
            _ => Self::Io(err),
        }
    }

    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}
