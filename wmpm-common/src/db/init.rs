//! Store file initialization
//!
//! The cache is a single SQLite file holding one `datasets` table. Each row is
//! one named dataset of the hierarchical layout (`/<source>/coordinates/x`,
//! `/<source>/targets/<target>/mapping_variance`, ...).

use crate::{Error, Result};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
    SqliteSynchronous,
};
use sqlx::ConnectOptions;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Lock wait before a competing writer gets a storage error
const BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

/// Open the store for writing, creating the file and parent folders if needed
pub async fn open_write_connection(db_path: &Path) -> Result<SqliteConnection> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // Rollback journal + FULL sync: a COMMIT is durable once it returns
    let mut conn = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Delete)
        .synchronous(SqliteSynchronous::Full)
        .busy_timeout(BUSY_TIMEOUT)
        .connect()
        .await?;

    if newly_created {
        info!("Initialized new mapping cache: {}", db_path.display());
    } else {
        info!("Opened existing mapping cache: {}", db_path.display());
    }

    create_datasets_table(&mut conn).await?;

    Ok(conn)
}

/// Open an existing store read-only
pub async fn connect_readonly(db_path: &Path) -> Result<SqlitePool> {
    if !db_path.exists() {
        return Err(Error::NotFound(format!(
            "Mapping cache does not exist: {}. Create it with `wmpm-cache build`",
            db_path.display()
        )));
    }

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .read_only(true)
        .busy_timeout(BUSY_TIMEOUT);

    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Create the datasets table (idempotent)
pub async fn create_datasets_table(conn: &mut SqliteConnection) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS datasets (
            path TEXT PRIMARY KEY,
            dtype TEXT NOT NULL CHECK (dtype IN ('str', 'f64', 'i64')),
            len INTEGER NOT NULL,
            value BLOB NOT NULL,
            written_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(&mut *conn)
    .await?;

    Ok(())
}
