use std::path::{Path, PathBuf};

/// Give up after this many `name (n).ext` candidates.
pub(crate) const MAX_NAME_ATTEMPTS: usize = 100;

/// Where a file ended up after being moved into the library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Placed {
    Moved(PathBuf),
    /// Identical content was already at the destination; the incoming copy
    /// was deleted.
    Duplicate(PathBuf),
}
impl Placed {
    pub(crate) fn path(&self) -> &Path {
        match self {
            Self::Moved(path) | Self::Duplicate(path) => path,
        }
    }

    pub(crate) fn into_path(self) -> PathBuf {
        match self {
            Self::Moved(path) | Self::Duplicate(path) => path,
        }
    }

    pub(crate) fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate(_))
    }
}

/// `dir/name.ext` becomes `dir/name (n).ext`.
pub(crate) fn numbered(path: &Path, n: usize) -> PathBuf {
    let stem = path.file_stem().map(|s| s.to_string_lossy()).unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{stem} ({n}).{}", ext.to_string_lossy()),
        None => format!("{stem} ({n})"),
    };
    path.with_file_name(name)
}

/// `file_name` of `from`, placed in `dir`.
pub(crate) fn destination(dir: &Path, from: &Path) -> PathBuf {
    match from.file_name() {
        Some(name) => dir.join(name),
        None => dir.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("ROMs/snes/mario.sfc", 2, "ROMs/snes/mario (2).sfc")]
    #[case("ROMs/psx/Final Fantasy VII (Disc 1).cue", 3, "ROMs/psx/Final Fantasy VII (Disc 1) (3).cue")]
    #[case("BIOS/psx/README", 2, "BIOS/psx/README (2)")]
    fn test_numbered(#[case] path: &str, #[case] n: usize, #[case] expected: &str) {
        assert_eq!(numbered(Path::new(path), n), Path::new(expected));
    }

    #[test]
    fn test_destination() {
        assert_eq!(destination(Path::new("ROMs/snes"), Path::new("Imports/mario.sfc")), Path::new("ROMs/snes/mario.sfc"));
    }
}
