//! Path validation.
//!
//! Every path handed to a backend is relative to the library root. Paths
//! coming out of archives, the import directory and user conflict
//! resolutions all pass through [`validate`] before touching the disk.

use std::path::{Component, Path, PathBuf};

use crate::error::{ErrorKind, Result};

/// Validates a storage path and returns its normalized form.
///
/// Rejects paths that escape the storage root (`..` past the top), null
/// bytes, Windows prefixes and paths that normalize to nothing.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use romport_storage::validate_path;
/// assert!(validate_path("ROMs/snes/mario.sfc").is_ok());
/// assert!(validate_path("Imports/../Conflicts/game.bin").is_ok());
/// assert!(validate_path("../etc/passwd").is_err());
/// assert!(validate_path("a\0b").is_err());
/// assert_eq!(
///     validate_path("Imports/./pack//mario.sfc/").unwrap(),
///     Path::new("Imports/pack/mario.sfc")
/// );
/// ```
pub fn validate(path: impl AsRef<Path>) -> Result<PathBuf> {
    let mut components = Vec::new();
    for component in path.as_ref().components() {
        match component {
            Component::Normal(s) => {
                // Null bytes pass through Path::components() on Unix but cause
                // truncation in C-based syscalls.
                if s.as_encoded_bytes().contains(&0) {
                    exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf()));
                }
                components.push(s)
            },
            Component::CurDir | Component::RootDir => {},
            Component::Prefix(_) => exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf())),
            Component::ParentDir => {
                if components.pop().is_none() {
                    exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf()));
                }
            },
        }
    }
    match components.is_empty() {
        true => exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf())),
        false => Ok(components.into_iter().collect()),
    }
}
