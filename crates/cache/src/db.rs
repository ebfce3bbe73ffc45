//! Database connection and pool management.

use exn::ResultExt;
use sqlx::SqliteConnection;
use sqlx::pool::PoolConnectionMetadata;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use std::path::Path;
use tracing::instrument;

use crate::error::{ErrorKind, Result};

/// Embedded migrations that are run automatically on connect.
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
// Imports run a handful of files concurrently, plus the UI reading.
const MAX_CONNECTIONS: u32 = 5;

/// Connection pool for the game database.
///
/// The database has an explicit lifecycle: [`connect()`](Self::connect),
/// [`reload()`](Self::reload) after the file was replaced underneath us (a
/// restored backup, a sync client), and [`close()`](Self::close) on shutdown.
/// Repositories hold a clone of the pool, so recreate them after a reload.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
    options: SqliteConnectOptions,
    max_connections: u32,
}

impl Database {
    async fn new(options: SqliteConnectOptions, max_connections: u32) -> Result<Self> {
        let pool = Self::open(&options, max_connections).await?;
        let db = Self { pool, options, max_connections };
        db.migrate().await?;
        Ok(db)
    }

    async fn open(options: &SqliteConnectOptions, max_connections: u32) -> Result<SqlitePool> {
        SqlitePoolOptions::new()
            // Query-based PRAGMAs must run on every pooled connection, not
            // just the first one.
            .after_connect(|conn, meta| Box::pin(async move { Self::apply_pragmas(conn, meta).await }))
            .max_connections(max_connections)
            .connect_with(options.clone())
            .await
            .or_raise(|| ErrorKind::Database)
    }

    /// Connect to the game database at the given path.
    ///
    /// Creates the database file if it doesn't exist and runs migrations.
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let options = Self::base_options().filename(path.as_ref()).create_if_missing(true);
        Self::new(options, MAX_CONNECTIONS).await
    }

    /// Connect to an in-memory database.
    ///
    /// Not `#[cfg(test)]`: other crates use this in their tests. The data is
    /// gone once the pool closes, including on [`reload()`](Self::reload).
    pub async fn connect_in_memory() -> Result<Self> {
        let options = Self::base_options().filename(":memory:");
        // Every connection to ":memory:" is its own database.
        Self::new(options, 1).await
    }

    fn base_options() -> SqliteConnectOptions {
        SqliteConnectOptions::new()
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .foreign_keys(true)
            .synchronous(SqliteSynchronous::Normal)
            // Concurrent imports write from several tasks; WAL only allows
            // one writer at a time.
            .busy_timeout(std::time::Duration::from_millis(1500))
            .auto_vacuum(sqlx::sqlite::SqliteAutoVacuum::None)
    }

    /// PRAGMA settings that aren't exposed via SqliteConnectOptions.
    async fn apply_pragmas(conn: &mut SqliteConnection, _meta: PoolConnectionMetadata) -> sqlx::Result<()> {
        sqlx::query(
            r#"
                PRAGMA locking_mode = NORMAL;
                PRAGMA wal_autocheckpoint = 800;
                PRAGMA cache_size = -4096;
                PRAGMA temp_store = MEMORY;
                PRAGMA analysis_limit = 1000;
            "#,
        )
        .execute(conn)
        .await?;
        Ok(())
    }

    #[instrument("performing database migrations", skip(self))]
    async fn migrate(&self) -> Result<()> {
        MIGRATOR.run(&self.pool).await.or_raise(|| ErrorKind::Migration)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    /// Close the current pool and open a fresh one with the same options.
    ///
    /// Migrations run again, so a replaced file that is behind on schema is
    /// brought up to date.
    #[instrument(skip(self))]
    pub async fn reload(&mut self) -> Result<()> {
        self.close().await;
        self.pool = Self::open(&self.options, self.max_connections).await?;
        self.migrate().await?;
        tracing::info!("game database reloaded");
        Ok(())
    }

    /// Close the database connection pool.
    ///
    /// Waits for all connections to be returned to the pool. Queries issued
    /// afterwards fail until [`reload()`](Self::reload) is called.
    pub async fn close(&self) {
        if self.pool.is_closed() {
            return;
        }
        // Let SQLite update query planner statistics.
        _ = sqlx::query("PRAGMA optimize").execute(&self.pool).await;
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_in_memory() {
        let db = Database::connect_in_memory().await.unwrap();
        assert!(!db.is_closed());
        db.close().await;
        assert!(db.is_closed());
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let db = Database::connect_in_memory().await.unwrap();
        db.migrate().await.unwrap();
        db.close().await;
    }

    #[tokio::test]
    async fn test_pragmas_are_applied() {
        let db = Database::connect_in_memory().await.unwrap();
        let row: (i64,) = sqlx::query_as("PRAGMA foreign_keys").fetch_one(db.pool()).await.unwrap();
        assert_eq!(row.0, 1, "foreign_keys should be ON");
        let row: (i64,) = sqlx::query_as("PRAGMA wal_autocheckpoint").fetch_one(db.pool()).await.unwrap();
        assert_eq!(row.0, 800, "WAL checkpoint should be 800");
        db.close().await;
    }

    #[tokio::test]
    async fn test_reload_file_database_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = Database::connect(dir.path().join("games.sqlite")).await.unwrap();
        sqlx::query(
            "INSERT INTO games (md5, system, path, name, title, imported_at, updated_at) \
             VALUES ('5eb63bbbe01eeed093cb22bb8f5acdc3', 'snes', 'ROMs/snes/a.sfc', 'a', 'a', 0, 0)",
        )
        .execute(db.pool())
        .await
        .unwrap();
        db.reload().await.unwrap();
        assert!(!db.is_closed());
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM games").fetch_one(db.pool()).await.unwrap();
        assert_eq!(row.0, 1);
        db.close().await;
    }

    #[tokio::test]
    async fn test_reload_after_close() {
        let mut db = Database::connect_in_memory().await.unwrap();
        db.close().await;
        db.reload().await.unwrap();
        assert!(!db.is_closed());
        db.close().await;
    }
}
