use crate::error::{Error, ErrorKind};
use exn::{OptionExt, ResultExt};
use romport_catalog::{GameMetadata, SystemId};
use std::path::{Path, PathBuf};
use time::UtcDateTime;

/// A game image filed into the library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Game {
    /// Lowercase hex MD5 of the image.
    pub md5: String,
    pub system: SystemId,
    /// Location relative to the library root.
    pub path: PathBuf,
    /// File stem, used to pair artwork with games.
    pub name: String,
    /// Display title: the looked-up title, or the file stem.
    pub title: String,
    pub region: Option<String>,
    pub artwork_url: Option<String>,
    pub artwork_path: Option<PathBuf>,
    pub imported_at: UtcDateTime,
}
impl Game {
    pub fn new(md5: impl Into<String>, system: SystemId, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = stem(&path);
        Self {
            md5: md5.into().to_lowercase(),
            system,
            title: name.clone(),
            name,
            path,
            region: None,
            artwork_url: None,
            artwork_path: None,
            imported_at: UtcDateTime::now(),
        }
    }

    /// Enriches the record with looked-up metadata. Blank titles are ignored.
    pub fn with_metadata(mut self, metadata: &GameMetadata) -> Self {
        if !metadata.title.trim().is_empty() {
            self.title = metadata.title.trim().to_string();
        }
        self.region = metadata.region.clone().or(self.region);
        self.artwork_url = metadata.artwork_url.clone().or(self.artwork_url);
        self
    }
}

fn stem(path: &Path) -> String {
    path.file_stem().map(|stem| stem.to_string_lossy().into_owned()).unwrap_or_default()
}

#[derive(sqlx::FromRow)]
pub(crate) struct GameRow {
    pub(crate) md5: String,
    pub(crate) system: String,
    pub(crate) path: String,
    pub(crate) name: String,
    pub(crate) title: String,
    pub(crate) region: Option<String>,
    pub(crate) artwork_url: Option<String>,
    pub(crate) artwork_path: Option<String>,
    pub(crate) imported_at: i64,
}
impl TryFrom<&Game> for GameRow {
    type Error = Error;
    fn try_from(game: &Game) -> Result<Self, Self::Error> {
        if game.md5.len() != 32 || !game.md5.bytes().all(|b| b.is_ascii_hexdigit()) {
            exn::bail!(ErrorKind::InvalidData("md5"));
        }
        let artwork_path = match &game.artwork_path {
            Some(path) => Some(path.to_str().ok_or_raise(|| ErrorKind::InvalidData("artwork path"))?.to_string()),
            None => None,
        };
        Ok(Self {
            md5: game.md5.clone(),
            system: game.system.to_string(),
            path: game.path.to_str().ok_or_raise(|| ErrorKind::InvalidData("path"))?.to_string(),
            name: game.name.clone(),
            title: game.title.clone(),
            region: game.region.clone(),
            artwork_url: game.artwork_url.clone(),
            artwork_path,
            imported_at: game.imported_at.unix_timestamp(),
        })
    }
}
impl TryFrom<GameRow> for Game {
    type Error = Error;
    fn try_from(row: GameRow) -> Result<Self, Self::Error> {
        Ok(Self {
            md5: row.md5,
            system: SystemId::from(row.system),
            path: PathBuf::from(row.path),
            name: row.name,
            title: row.title,
            region: row.region,
            artwork_url: row.artwork_url,
            artwork_path: row.artwork_path.map(PathBuf::from),
            imported_at: UtcDateTime::from_unix_timestamp(row.imported_at)
                .or_raise(|| ErrorKind::InvalidData("import date"))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MD5: &str = "5eb63bbbe01eeed093cb22bb8f5acdc3";

    #[test]
    fn test_new_uses_file_stem() {
        let game = Game::new(MD5.to_uppercase(), SystemId::from("snes"), "ROMs/snes/Super Mario World.sfc");
        assert_eq!(game.md5, MD5);
        assert_eq!(game.name, "Super Mario World");
        assert_eq!(game.title, "Super Mario World");
    }

    #[test]
    fn test_with_metadata() {
        let game = Game::new(MD5, SystemId::from("snes"), "ROMs/snes/smw.sfc").with_metadata(&GameMetadata {
            title: " Super Mario World ".into(),
            region: Some("USA".into()),
            system: None,
            artwork_url: Some("https://example.invalid/smw.png".into()),
        });
        assert_eq!(game.title, "Super Mario World");
        assert_eq!(game.name, "smw");
        assert_eq!(game.region.as_deref(), Some("USA"));
        let blank = game.clone().with_metadata(&GameMetadata::default());
        assert_eq!(blank.title, "Super Mario World");
        assert_eq!(blank.artwork_url, game.artwork_url);
    }

    #[test]
    fn test_row_roundtrip_drops_nanoseconds() {
        let game = Game::new(MD5, SystemId::from("gba"), "ROMs/gba/zelda.gba");
        let row = GameRow::try_from(&game).unwrap();
        let back = Game::try_from(row).unwrap();
        // Unix timestamps are measured in seconds.
        assert_eq!(back.imported_at, game.imported_at.replace_nanosecond(0).unwrap());
        assert_eq!(back.path, game.path);
        assert_eq!(back.system, game.system);
    }

    #[test]
    fn test_invalid_md5_rejected() {
        let game = Game::new("not-a-digest", SystemId::from("gba"), "ROMs/gba/zelda.gba");
        let err = GameRow::try_from(&game).err().unwrap();
        assert!(matches!(&*err, ErrorKind::InvalidData("md5")));
    }
}
