//! Helpers to create/configure the
//! SQLite pool.
use std::{
  path::{Path, PathBuf},
  str::FromStr,
  time::Duration,
};

use sqlx::{
  SqlitePool,
  sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
};

use crate::error::StoreError;

pub async fn create_pool(
  db_path: &Path
) -> Result<SqlitePool, StoreError> {
  let full_path = if db_path.is_absolute() {
    db_path.to_path_buf()
  } else {
    std::env::current_dir()
      .unwrap_or_else(|_| PathBuf::from("."))
      .join(db_path)
  };

  if let Some(parent) = full_path.parent().filter(|p| !p.as_os_str().is_empty()) {
    std::fs::create_dir_all(parent).map_err(|e| StoreError::backend("sqlite dir create", e))?;
  }

  let url = format!("sqlite://{}", full_path.display());
  let opts = SqliteConnectOptions::from_str(&url)?
    .create_if_missing(true)
    .journal_mode(SqliteJournalMode::Wal)
    .busy_timeout(Duration::from_secs(5))
    .foreign_keys(true);

  Ok(SqlitePoolOptions::new()
    .max_connections(10)
    .connect_with(opts)
    .await?)
}

/// A private in-memory database. One
/// connection that never idles out, so
/// the schema lives as long as the
/// pool.
pub async fn create_memory_pool() -> Result<SqlitePool, StoreError> {
  let opts =
    SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

  Ok(SqlitePoolOptions::new()
    .max_connections(1)
    .min_connections(1)
    .idle_timeout(None)
    .max_lifetime(None)
    .connect_with(opts)
    .await?)
}

/// Removes the database file and its
/// WAL companions.
pub fn wipe_database_file(
  db_path: &Path
) -> Result<(), StoreError> {
  for suffix in ["", "-wal", "-shm"] {
    let mut p =
      db_path.as_os_str().to_owned();
    p.push(suffix);
    match std::fs::remove_file(PathBuf::from(p)) {
      | Ok(()) => {}
      | Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
      | Err(e) => return Err(StoreError::backend("sqlite wipe", e)),
    }
  }
  Ok(())
}
