use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::path::{Path, PathBuf};

use crate::SystemCatalog;
use crate::system::normalize_extension;

/// Image formats accepted as box art.
pub const ARTWORK_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "bmp"];
/// Disc descriptor and image formats.
pub const CDROM_EXTENSIONS: &[&str] = &["cue", "m3u", "ccd", "chd", "cdi", "gdi", "toc", "pbp"];

/// What kind of library content a file is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Bios,
    Artwork,
    Game,
    CdRom,
    #[default]
    Unknown,
}
impl FileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bios => "bios",
            Self::Artwork => "artwork",
            Self::Game => "game",
            Self::CdRom => "cdrom",
            Self::Unknown => "unknown",
        }
    }

    /// Whether a successful import of this type lands in exactly one system.
    pub fn requires_system(&self) -> bool {
        matches!(self, Self::Bios | Self::Game | Self::CdRom)
    }
}
impl Display for FileType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension().map(|ext| normalize_extension(&ext.to_string_lossy()))
}

pub fn is_artwork(path: impl AsRef<Path>) -> bool {
    extension_of(path.as_ref()).is_some_and(|ext| ARTWORK_EXTENSIONS.contains(&ext.as_str()))
}

pub fn is_cdrom(path: impl AsRef<Path>) -> bool {
    extension_of(path.as_ref()).is_some_and(|ext| CDROM_EXTENSIONS.contains(&ext.as_str()))
}

impl SystemCatalog {
    /// Classifies a file by name and, when known, content digest.
    ///
    /// BIOS detection comes first so that BIOS dumps sharing a game extension
    /// (`.bin`) never reach conflict resolution.
    pub fn classify(&self, path: impl AsRef<Path>, md5: Option<&str>) -> FileType {
        let path = path.as_ref();
        if self.bios().find(path, md5).is_some() {
            return FileType::Bios;
        }
        if is_artwork(path) {
            return FileType::Artwork;
        }
        if is_cdrom(path) {
            return FileType::CdRom;
        }
        if self.recognizes(path) {
            return FileType::Game;
        }
        FileType::Unknown
    }
}

fn import_rank(path: &Path) -> u8 {
    match extension_of(path).as_deref() {
        Some("m3u") => 0,
        Some("cue") => 1,
        _ => 2,
    }
}

/// Sorts an import batch so playlists come first, then cue sheets, then
/// everything else, keeping disc images behind the descriptors that
/// reference them. Order within a rank is preserved.
pub fn sort_import_paths(paths: &mut [PathBuf]) {
    paths.sort_by_key(|path| import_rank(path));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BiosEntry, System};
    use rstest::rstest;

    fn catalog() -> SystemCatalog {
        SystemCatalog::new(
            [
                System::new("snes", "Super Nintendo", &["sfc"]),
                System::new("genesis", "Sega Genesis", &["md", "bin"]),
                System::new("psx", "PlayStation", &["cue", "chd", "m3u"]),
            ],
            [BiosEntry::new("scph1001.bin", None, "psx")],
        )
        .unwrap()
    }

    #[rstest]
    #[case("Imports/mario.sfc", FileType::Game)]
    #[case("Imports/game.bin", FileType::Game)]
    #[case("Imports/scph1001.bin", FileType::Bios)]
    #[case("Imports/mario.PNG", FileType::Artwork)]
    #[case("Imports/ff7.cue", FileType::CdRom)]
    #[case("Imports/ff7.m3u", FileType::CdRom)]
    #[case("Imports/notes.txt", FileType::Unknown)]
    fn test_classify(#[case] path: &str, #[case] expected: FileType) {
        assert_eq!(catalog().classify(path, None), expected);
    }

    #[test]
    fn test_requires_system() {
        assert!(FileType::Game.requires_system());
        assert!(FileType::Bios.requires_system());
        assert!(!FileType::Artwork.requires_system());
        assert!(!FileType::Unknown.requires_system());
    }

    #[test]
    fn test_sort_import_paths() {
        let mut paths: Vec<PathBuf> =
            ["b.bin", "a.sfc", "ff7.cue", "ff7.m3u", "c.bin", "other.CUE"].iter().map(PathBuf::from).collect();
        sort_import_paths(&mut paths);
        let sorted: Vec<_> = paths.iter().map(|p| p.to_str().unwrap()).collect();
        assert_eq!(sorted, ["ff7.m3u", "ff7.cue", "other.CUE", "b.bin", "a.sfc", "c.bin"]);
    }
}
