//! Creates the partitioned ledger and
//! its response table.
use sqlx::PgPool;
use tracing::info;

use crate::error::StoreError;

pub async fn migrate(
  pool: &PgPool
) -> Result<(), StoreError> {
  info!("Ledger migrate start (postgres)");

  let ddls = [
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
    created_at_ms BIGINT NOT NULL
   )"#,
    r#"
   CREATE TABLE IF NOT EXISTS fetch_attempts(
    seq BIGSERIAL,
    id TEXT NOT NULL,
    url TEXT NOT NULL,
    lookup_key TEXT NOT NULL,
    status TEXT NOT NULL,
    source TEXT NOT NULL,
    created_at_ms BIGINT NOT NULL,
    created_at_text TEXT NOT NULL,
    next_retry_at_ms BIGINT NULL,
    error_message TEXT NULL,
    http_status INTEGER NULL,
    response_id TEXT NULL,
    PRIMARY KEY (id, created_at_ms)
   ) PARTITION BY RANGE (created_at_ms)"#,
    r#"
   CREATE INDEX IF NOT EXISTS idx_fetch_attempts_key_created
   ON fetch_attempts(lookup_key, created_at_ms DESC)"#,
    r#"
   CREATE INDEX IF NOT EXISTS idx_fetch_attempts_url_created
   ON fetch_attempts(url, created_at_ms DESC)"#,
    r#"CREATE INDEX IF NOT EXISTS idx_fetch_responses_created ON fetch_responses(created_at_ms)"#,
  ];

  for ddl in ddls {
    sqlx::query(ddl).execute(pool).await?;
  }

  info!("Ledger migrate done (postgres)");
  Ok(())
}
