//! Repository for game records.

use crate::Database;
use crate::error::{ErrorKind, Result};
use crate::models::{Game, GameRow};
use exn::{OptionExt, ResultExt};
use romport_catalog::SystemId;
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use time::UtcDateTime;

/// Whether an upsert created a record or refreshed an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upserted {
    Inserted,
    /// The digest was already known; the record now points at the new
    /// location and metadata.
    Updated,
}
impl Upserted {
    pub fn was_modified(&self) -> bool {
        matches!(self, Self::Updated)
    }
}

/// Repository for game records in the library database.
///
/// Records are keyed by content digest: moving or renaming a file updates the
/// existing record rather than creating a second one. At most one record
/// exists per path.
#[derive(Debug, Clone)]
pub struct Repository {
    pool: SqlitePool,
}
impl From<&Database> for Repository {
    fn from(db: &Database) -> Self {
        Self { pool: db.pool().clone() }
    }
}
impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn pool(&self) -> Result<&SqlitePool> {
        if self.pool.is_closed() {
            exn::bail!(ErrorKind::Closed);
        }
        Ok(&self.pool)
    }

    fn sqlx_hates_paths(path: impl AsRef<Path>) -> Result<String> {
        Ok(path.as_ref().to_str().ok_or_raise(|| ErrorKind::InvalidData("path"))?.to_string())
    }

    fn into_games(rows: Vec<GameRow>) -> Result<Vec<Game>> {
        rows.into_iter().map(Game::try_from).collect()
    }

    /// Insert or refresh a game record.
    ///
    /// A record for a different digest at the same path is stale (the file
    /// was replaced) and is removed in the same transaction.
    pub async fn upsert(&self, game: &Game) -> Result<Upserted> {
        let row = GameRow::try_from(game)?;
        let mut tx = self.pool()?.begin().await.or_raise(|| ErrorKind::Database)?;
        let existed: bool = sqlx::query_scalar(include_str!("../queries/game_exists.sql"))
            .bind(&row.md5)
            .fetch_one(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        sqlx::query(include_str!("../queries/delete_stale_at_path.sql"))
            .bind(&row.path)
            .bind(&row.md5)
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        sqlx::query(include_str!("../queries/upsert_game.sql"))
            .bind(row.md5)
            .bind(row.system)
            .bind(row.path)
            .bind(row.name)
            .bind(row.title)
            .bind(row.region)
            .bind(row.artwork_url)
            .bind(row.artwork_path)
            .bind(row.imported_at)
            .bind(UtcDateTime::now().unix_timestamp())
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        Ok(if existed { Upserted::Updated } else { Upserted::Inserted })
    }

    pub async fn get_by_md5(&self, md5: impl AsRef<str>) -> Result<Option<Game>> {
        let row: Option<GameRow> = sqlx::query_as(include_str!("../queries/get_by_md5.sql"))
            .bind(md5.as_ref().to_lowercase())
            .fetch_optional(self.pool()?)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(Game::try_from).transpose()
    }

    pub async fn get_by_path(&self, path: impl AsRef<Path>) -> Result<Option<Game>> {
        let row: Option<GameRow> = sqlx::query_as(include_str!("../queries/get_by_path.sql"))
            .bind(Self::sqlx_hates_paths(path)?)
            .fetch_optional(self.pool()?)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(Game::try_from).transpose()
    }

    /// Games whose file stem equals `name`, ignoring ASCII case.
    pub async fn find_by_name(&self, name: impl AsRef<str>) -> Result<Vec<Game>> {
        let rows: Vec<GameRow> = sqlx::query_as(include_str!("../queries/find_by_name.sql"))
            .bind(name.as_ref())
            .fetch_all(self.pool()?)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Self::into_games(rows)
    }

    pub async fn list_for_system(&self, system: &SystemId) -> Result<Vec<Game>> {
        let rows: Vec<GameRow> = sqlx::query_as(include_str!("../queries/list_for_system.sql"))
            .bind(system.as_str())
            .fetch_all(self.pool()?)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Self::into_games(rows)
    }

    /// Every known path, sorted.
    pub async fn list_paths(&self) -> Result<Vec<PathBuf>> {
        let paths: Vec<String> = sqlx::query_scalar(include_str!("../queries/list_paths.sql"))
            .fetch_all(self.pool()?)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(paths.into_iter().map(PathBuf::from).collect())
    }

    /// Record local artwork for a game. Returns `false` for unknown digests.
    pub async fn set_artwork(&self, md5: impl AsRef<str>, artwork: impl AsRef<Path>) -> Result<bool> {
        let result = sqlx::query(include_str!("../queries/set_artwork.sql"))
            .bind(md5.as_ref().to_lowercase())
            .bind(Self::sqlx_hates_paths(artwork)?)
            .bind(UtcDateTime::now().unix_timestamp())
            .execute(self.pool()?)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(result.rows_affected() > 0)
    }

    /// Returns `false` if there was nothing to delete.
    pub async fn delete(&self, md5: impl AsRef<str>) -> Result<bool> {
        let result = sqlx::query(include_str!("../queries/delete_game.sql"))
            .bind(md5.as_ref().to_lowercase())
            .execute(self.pool()?)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SMW: &str = "cdd3c8c37322978ca8669b34bc89c804";
    const ZELDA: &str = "d4bf9e7bcf9a48da53785d2ae7bc4270";

    async fn repo() -> (Database, Repository) {
        let db = Database::connect_in_memory().await.unwrap();
        let repo = Repository::from(&db);
        (db, repo)
    }

    #[tokio::test]
    async fn test_upsert_and_get() {
        let (db, repo) = repo().await;
        let game = Game::new(SMW, SystemId::from("snes"), "ROMs/snes/smw.sfc");
        assert_eq!(repo.upsert(&game).await.unwrap(), Upserted::Inserted);
        let by_md5 = repo.get_by_md5(SMW.to_uppercase()).await.unwrap().unwrap();
        assert_eq!(by_md5.path, Path::new("ROMs/snes/smw.sfc"));
        assert_eq!(by_md5.system, SystemId::from("snes"));
        let by_path = repo.get_by_path("ROMs/snes/smw.sfc").await.unwrap().unwrap();
        assert_eq!(by_path.md5, SMW);
        assert!(repo.get_by_path("ROMs/snes/other.sfc").await.unwrap().is_none());
        db.close().await;
    }

    #[tokio::test]
    async fn test_upsert_existing_reports_update() {
        let (db, repo) = repo().await;
        let game = Game::new(SMW, SystemId::from("snes"), "ROMs/snes/smw.sfc");
        repo.upsert(&game).await.unwrap();
        let moved = Game::new(SMW, SystemId::from("snes"), "ROMs/snes/Super Mario World.sfc");
        let upserted = repo.upsert(&moved).await.unwrap();
        assert!(upserted.was_modified());
        assert!(repo.get_by_path("ROMs/snes/smw.sfc").await.unwrap().is_none());
        assert_eq!(repo.list_paths().await.unwrap(), [PathBuf::from("ROMs/snes/Super Mario World.sfc")]);
        db.close().await;
    }

    #[tokio::test]
    async fn test_replaced_file_removes_stale_record() {
        let (db, repo) = repo().await;
        repo.upsert(&Game::new(SMW, SystemId::from("snes"), "ROMs/snes/game.sfc")).await.unwrap();
        repo.upsert(&Game::new(ZELDA, SystemId::from("snes"), "ROMs/snes/game.sfc")).await.unwrap();
        assert!(repo.get_by_md5(SMW).await.unwrap().is_none());
        assert_eq!(repo.get_by_path("ROMs/snes/game.sfc").await.unwrap().unwrap().md5, ZELDA);
        db.close().await;
    }

    #[tokio::test]
    async fn test_find_by_name_and_artwork() {
        let (db, repo) = repo().await;
        repo.upsert(&Game::new(SMW, SystemId::from("snes"), "ROMs/snes/Mario.sfc")).await.unwrap();
        let found = repo.find_by_name("mario").await.unwrap();
        assert_eq!(found.len(), 1);
        assert!(repo.set_artwork(SMW, "Artwork/mario.png").await.unwrap());
        assert!(!repo.set_artwork(ZELDA, "Artwork/zelda.png").await.unwrap());
        let game = repo.get_by_md5(SMW).await.unwrap().unwrap();
        assert_eq!(game.artwork_path.as_deref(), Some(Path::new("Artwork/mario.png")));
        // Re-importing without artwork keeps what was recorded.
        repo.upsert(&Game::new(SMW, SystemId::from("snes"), "ROMs/snes/Mario.sfc")).await.unwrap();
        let game = repo.get_by_md5(SMW).await.unwrap().unwrap();
        assert!(game.artwork_path.is_some());
        db.close().await;
    }

    #[tokio::test]
    async fn test_list_for_system_and_delete() {
        let (db, repo) = repo().await;
        repo.upsert(&Game::new(SMW, SystemId::from("snes"), "ROMs/snes/smw.sfc")).await.unwrap();
        repo.upsert(&Game::new(ZELDA, SystemId::from("gba"), "ROMs/gba/zelda.gba")).await.unwrap();
        assert_eq!(repo.list_for_system(&SystemId::from("snes")).await.unwrap().len(), 1);
        assert!(repo.delete(SMW).await.unwrap());
        assert!(!repo.delete(SMW).await.unwrap());
        assert!(repo.list_for_system(&SystemId::from("snes")).await.unwrap().is_empty());
        db.close().await;
    }

    #[tokio::test]
    async fn test_closed_database() {
        let (db, repo) = repo().await;
        db.close().await;
        let err = repo.get_by_md5(SMW).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Closed));
    }
}
