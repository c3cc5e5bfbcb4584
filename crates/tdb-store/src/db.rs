use std::path::Path;
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use tdb_core::Result;

/// Opens (creating if absent) the SQLite database file at `path`, with WAL
/// mode and foreign keys enabled so readers never block on a writer (§5),
/// then runs every pending migration.
pub async fn open(path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
        .map_err(|e| tdb_core::Error::Unavailable(e.to_string()))?
        .create_if_missing(true)
        .foreign_keys(true)
        .synchronous(SqliteSynchronous::Normal)
        .pragma("journal_mode", "WAL");

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(opts)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await.map_err(|e| {
        tdb_core::Error::Internal(format!("migration failed: {e}"))
    })?;

    Ok(pool)
}

/// Opens an in-memory database for tests: same migrations, no file on disk.
pub async fn open_in_memory() -> Result<SqlitePool> {
    let opts = SqliteConnectOptions::from_str("sqlite::memory:")
        .map_err(|e| tdb_core::Error::Unavailable(e.to_string()))?
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(opts)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await.map_err(|e| {
        tdb_core::Error::Internal(format!("migration failed: {e}"))
    })?;

    Ok(pool)
}
