//! Creates the ledger tables and
//! indexes.
use sqlx::SqlitePool;
use tracing::info;

use crate::error::StoreError;

pub async fn migrate(
  pool: &SqlitePool
) -> Result<(), StoreError> {
  info!("Ledger migrate start (sqlite)");

  let ddls = [
    r#"
   CREATE TABLE IF NOT EXISTS ledger_partitions(
    partition_key TEXT PRIMARY KEY,
    range_start_ms INTEGER NOT NULL,
    range_end_ms INTEGER NOT NULL,
    created_at_ms INTEGER NOT NULL
   )"#,
    r#"
   CREATE TABLE IF NOT EXISTS fetch_responses(
    id TEXT PRIMARY KEY,
    status_code INTEGER NOT NULL,
    text_hash TEXT NOT NULL,
    is_from_known_cdn BOOLEAN NOT NULL,
    etag TEXT NULL,
    last_modified TEXT NULL,
    location_tier TEXT NOT NULL,
    location_key TEXT NOT NULL,
    created_at_ms INTEGER NOT NULL
   )"#,
    r#"
   CREATE TABLE IF NOT EXISTS fetch_attempts(
    id TEXT PRIMARY KEY,
    partition_key TEXT NOT NULL REFERENCES ledger_partitions(partition_key),
    url TEXT NOT NULL,
    lookup_key TEXT NOT NULL,
    status TEXT NOT NULL,
    source TEXT NOT NULL,
    created_at_ms INTEGER NOT NULL,
    created_at_text TEXT NOT NULL,
    next_retry_at_ms INTEGER NULL,
    error_message TEXT NULL,
    http_status INTEGER NULL,
    response_id TEXT NULL
   )"#,
    r#"
   CREATE INDEX IF NOT EXISTS idx_fetch_attempts_key_created
   ON fetch_attempts(lookup_key, created_at_ms DESC)"#,
    r#"
   CREATE INDEX IF NOT EXISTS idx_fetch_attempts_url_created
   ON fetch_attempts(url, created_at_ms DESC)"#,
    r#"CREATE INDEX IF NOT EXISTS idx_fetch_attempts_partition ON fetch_attempts(partition_key)"#,
    r#"CREATE INDEX IF NOT EXISTS idx_fetch_responses_created ON fetch_responses(created_at_ms)"#,
  ];

  for ddl in ddls {
    sqlx::query(ddl).execute(pool).await?;
  }

  info!("Ledger migrate done (sqlite)");
  Ok(())
}
