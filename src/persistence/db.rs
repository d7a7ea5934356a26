//! `SQLite` connection pool setup and schema bootstrap.

use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::config::NameMatch;
use crate::{AppError, Result};

use super::schema;

/// Alias for the shared `SQLite` pool.
pub type Database = SqlitePool;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open (creating if missing) the file-backed store at `path` and apply schema.
///
/// # Errors
///
/// Returns `AppError::Io` if the parent directory cannot be created and
/// `AppError::Store` if the connection or schema bootstrap fails.
pub async fn connect(path: &Path, name_match: NameMatch) -> Result<Database> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|err| AppError::Io(format!("failed to create db dir: {err}")))?;
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(BUSY_TIMEOUT);

    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await?;

    schema::bootstrap_schema(&pool, name_match).await?;
    Ok(pool)
}

/// Open an in-memory store for tests.
///
/// The pool holds exactly one connection that never expires; a fresh
/// connection would see an empty database.
///
/// # Errors
///
/// Returns `AppError::Store` if the connection or schema bootstrap fails.
pub async fn connect_memory(name_match: NameMatch) -> Result<Database> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    schema::bootstrap_schema(&pool, name_match).await?;
    Ok(pool)
}
