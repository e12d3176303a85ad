/// SQLite connection setup
///
/// One pool serves both the automation store and the execution recorder. Schemas
/// are created by their owners (`init_schema`), safe to call repeatedly.

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

/// Open (creating if missing) the database at `database_url`, e.g. "sqlite://data/radflow.db"
pub async fn connect(database_url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)
        .map_err(|e| anyhow::anyhow!("Invalid database url '{}': {}", database_url, e))?
        .create_if_missing(true)
        .foreign_keys(true);

    if let Some(path) = options.get_filename().parent() {
        if !path.as_os_str().is_empty() {
            std::fs::create_dir_all(path)
                .map_err(|e| anyhow::anyhow!("Failed to create database directory '{}': {}", path.display(), e))?;
        }
    }

    tracing::info!("🗄️ Opening database: {}", database_url);
    let pool = SqlitePoolOptions::new().connect_with(options).await?;
    Ok(pool)
}

/// Private in-memory database
///
/// A single connection that never idles out, since every new in-memory connection
/// would be a fresh, empty database.
pub async fn connect_in_memory() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;
    Ok(pool)
}
