//! Postgres ledger over a
//! range-partitioned `fetch_attempts`
//! table. Monthly partitions are
//! created on demand and remembered for
//! the process lifetime.
mod connection;
mod migrations;

use std::collections::{
  BTreeSet,
  HashSet
};
use std::sync::Mutex;

use chrono_tz::Tz;
use sqlx::{
  PgPool,
  Postgres,
  QueryBuilder
};
use tracing::{
  debug,
  info,
  warn
};

pub use connection::wipe_database;
use connection::{
  is_duplicate_table_error,
  quote_ident
};

use crate::domain::model::{
  AttemptFilter,
  FetchAttempt,
  PostgresConfig,
  StoredResponse
};
use crate::domain::partition::{
  ATTEMPTS_TABLE,
  MonthPartition
};
use crate::error::StoreError;
use crate::infra::ledger_rows::{
  ATTEMPT_SELECT,
  AttemptRecord,
  INSERT_CHUNK,
  into_attempts
};
use crate::infra::time::epoch_ms_to_iso;
use crate::ports::ledger::Ledger;

pub struct PostgresLedger {
  pool: PgPool,
  zone: Tz,
  known_partitions: Mutex<HashSet<MonthPartition>>,
}

impl PostgresLedger {
  pub async fn new(
    cfg: &PostgresConfig,
    zone: Tz
  ) -> Result<Self, StoreError> {
    let pool =
      connection::create_pool(cfg, &zone).await?;
    Ok(Self {
      pool,
      zone,
      known_partitions: Mutex::new(HashSet::new()),
    })
  }

  fn is_known(
    &self,
    partition: MonthPartition
  ) -> bool {
    self.known_partitions
      .lock()
      .map(|k| k.contains(&partition))
      .unwrap_or(false)
  }

  fn remember(
    &self,
    partition: MonthPartition
  ) {
    if let Ok(mut k) = self.known_partitions.lock() {
      k.insert(partition);
    }
  }

  fn forget(
    &self,
    partition: MonthPartition
  ) {
    if let Ok(mut k) = self.known_partitions.lock() {
      k.remove(&partition);
    }
  }

  async fn partition_exists(
    &self,
    partition: MonthPartition
  ) -> Result<bool, StoreError> {
    let hit: Option<i32> = sqlx::query_scalar(
      r#"
      SELECT 1
      FROM pg_class c
      JOIN pg_namespace n ON n.oid = c.relnamespace
      WHERE c.relname = $1 AND n.nspname = current_schema()
      "#,
    )
    .bind(partition.table_name())
    .fetch_optional(&self.pool)
    .await?;
    Ok(hit.is_some())
  }
}

#[async_trait::async_trait]
impl Ledger for PostgresLedger {
  async fn migrate(
    &self
  ) -> Result<(), StoreError> {
    migrations::migrate(&self.pool).await
  }

  async fn insert_attempts(
    &self,
    attempts: &[FetchAttempt]
  ) -> Result<(), StoreError> {
    if attempts.is_empty() {
      return Ok(());
    }

    let months: BTreeSet<MonthPartition> = attempts
      .iter()
      .map(|a| MonthPartition::containing(a.created_at_ms))
      .collect();
    for month in months {
      if !self.is_known(month) && self.ensure_partition(month).await? {
        info!(partition = %month, "Ledger partition created on insert");
      }
    }

    let mut tx =
      self.pool.begin().await?;

    let responses: Vec<&StoredResponse> =
      attempts.iter().filter_map(|a| a.response.as_ref()).collect();
    for chunk in responses.chunks(INSERT_CHUNK) {
      let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
        "INSERT INTO fetch_responses(id, status_code, text_hash, is_from_known_cdn, etag, \
         last_modified, location_tier, location_key, created_at_ms) ",
      );
      qb.push_values(chunk, |mut b, r| {
        b.push_bind(r.id.as_str())
          .push_bind(i32::from(r.status_code))
          .push_bind(r.text_hash.as_str())
          .push_bind(r.is_from_known_cdn)
          .push_bind(r.etag.as_deref())
          .push_bind(r.last_modified.as_deref())
          .push_bind(r.location.tier())
          .push_bind(r.location.key())
          .push_bind(r.created_at_ms);
      });
      qb.build().execute(&mut *tx).await?;
    }

    for chunk in attempts.chunks(INSERT_CHUNK) {
      let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
        "INSERT INTO fetch_attempts(id, url, lookup_key, status, source, created_at_ms, \
         created_at_text, next_retry_at_ms, error_message, http_status, response_id) ",
      );
      qb.push_values(chunk, |mut b, a| {
        b.push_bind(a.id.as_str())
          .push_bind(a.url.as_str())
          .push_bind(a.lookup_key.as_str())
          .push_bind(a.status.as_str())
          .push_bind(a.source.as_str())
          .push_bind(a.created_at_ms)
          .push_bind(epoch_ms_to_iso(a.created_at_ms, &self.zone))
          .push_bind(a.next_retry_at_ms)
          .push_bind(a.error_message.as_deref())
          .push_bind(a.http_status.map(i32::from))
          .push_bind(a.response.as_ref().map(|r| r.id.as_str()));
      });
      qb.build().execute(&mut *tx).await?;
    }

    tx.commit().await?;
    debug!(rows = attempts.len(), responses = responses.len(), "Ledger rows inserted");
    Ok(())
  }

  async fn latest_ok(
    &self,
    lookup_key: &str
  ) -> Result<Option<FetchAttempt>, StoreError> {
    let sql = format!(
      "{ATTEMPT_SELECT} WHERE a.lookup_key = $1 AND a.status = 'ok' \
       ORDER BY a.created_at_ms DESC, a.seq DESC LIMIT 1"
    );
    let row = sqlx::query_as::<_, AttemptRecord>(&sql)
      .bind(lookup_key)
      .fetch_optional(&self.pool)
      .await?;
    row.map(FetchAttempt::try_from).transpose()
  }

  async fn latest_attempt(
    &self,
    lookup_key: &str
  ) -> Result<Option<FetchAttempt>, StoreError> {
    let sql = format!(
      "{ATTEMPT_SELECT} WHERE a.lookup_key = $1 \
       ORDER BY a.created_at_ms DESC, a.seq DESC LIMIT 1"
    );
    let row = sqlx::query_as::<_, AttemptRecord>(&sql)
      .bind(lookup_key)
      .fetch_optional(&self.pool)
      .await?;
    row.map(FetchAttempt::try_from).transpose()
  }

  async fn latest_next_retry_at(
    &self,
    lookup_key: &str
  ) -> Result<Option<i64>, StoreError> {
    let value: Option<i64> = sqlx::query_scalar(
      r#"
      SELECT next_retry_at_ms
      FROM fetch_attempts
      WHERE lookup_key = $1 AND next_retry_at_ms IS NOT NULL
      ORDER BY created_at_ms DESC, seq DESC
      LIMIT 1
      "#,
    )
    .bind(lookup_key)
    .fetch_optional(&self.pool)
    .await?;
    Ok(value)
  }

  async fn count_failed_since(
    &self,
    lookup_key: &str,
    since_ms: Option<i64>
  ) -> Result<u64, StoreError> {
    let count: i64 = sqlx::query_scalar(
      r#"
      SELECT COUNT(*)
      FROM fetch_attempts
      WHERE lookup_key = $1
       AND source = 'scheduled'
       AND status NOT IN ('ok', 'refused_oversized')
       AND ($2::BIGINT IS NULL OR created_at_ms > $2)
      "#,
    )
    .bind(lookup_key)
    .bind(since_ms)
    .fetch_one(&self.pool)
    .await?;
    Ok(count.max(0) as u64)
  }

  async fn has_any_since(
    &self,
    lookup_key: &str,
    since_ms: i64
  ) -> Result<bool, StoreError> {
    let hit: bool = sqlx::query_scalar(
      r#"
      SELECT EXISTS (
       SELECT 1
       FROM fetch_attempts
       WHERE lookup_key = $1 AND source = 'scheduled' AND created_at_ms > $2
      )
      "#,
    )
    .bind(lookup_key)
    .bind(since_ms)
    .fetch_one(&self.pool)
    .await?;
    Ok(hit)
  }

  async fn list_recent(
    &self,
    filter: &AttemptFilter,
    limit: u32,
    offset: u32,
  ) -> Result<Vec<FetchAttempt>, StoreError> {
    let (column, value) = match filter {
      | AttemptFilter::Url(u) => ("a.url", u.as_str()),
      | AttemptFilter::LookupKey(k) => ("a.lookup_key", k.as_str()),
    };
    let sql = format!(
      "{ATTEMPT_SELECT} WHERE {column} = $1 \
       ORDER BY a.created_at_ms DESC, a.seq DESC LIMIT $2 OFFSET $3"
    );
    let rows = sqlx::query_as::<_, AttemptRecord>(&sql)
      .bind(value)
      .bind(i64::from(limit))
      .bind(i64::from(offset))
      .fetch_all(&self.pool)
      .await?;
    into_attempts(rows)
  }

  async fn list_partitions(
    &self
  ) -> Result<Vec<MonthPartition>, StoreError> {
    let names: Vec<String> = sqlx::query_scalar(
      r#"
      SELECT c.relname::TEXT
      FROM pg_inherits i
      JOIN pg_class c ON c.oid = i.inhrelid
      JOIN pg_class p ON p.oid = i.inhparent
      JOIN pg_namespace n ON n.oid = p.relnamespace
      WHERE p.relname = $1 AND n.nspname = current_schema()
      ORDER BY c.relname
      "#,
    )
    .bind(ATTEMPTS_TABLE)
    .fetch_all(&self.pool)
    .await?;

    let mut out =
      Vec::with_capacity(names.len());
    for name in names {
      match MonthPartition::from_table_name(&name) {
        | Some(p) => out.push(p),
        | None => warn!(table = %name, "Ignoring unrecognised ledger partition"),
      }
    }
    out.sort();
    Ok(out)
  }

  async fn ensure_partition(
    &self,
    partition: MonthPartition
  ) -> Result<bool, StoreError> {
    if self.partition_exists(partition).await? {
      self.remember(partition);
      return Ok(false);
    }

    let ddl = format!(
      "CREATE TABLE IF NOT EXISTS {} PARTITION OF {ATTEMPTS_TABLE} FOR VALUES FROM ({}) TO ({})",
      quote_ident(&partition.table_name()),
      partition.start_ms(),
      partition.end_ms()
    );
    let created = match sqlx::query(&ddl).execute(&self.pool).await {
      | Ok(_) => true,
      | Err(e) if is_duplicate_table_error(&e) => false,
      | Err(e) => return Err(e.into()),
    };

    self.remember(partition);
    Ok(created)
  }

  async fn drop_partition(
    &self,
    partition: MonthPartition
  ) -> Result<(), StoreError> {
    let mut tx =
      self.pool.begin().await?;

    sqlx::query(
      r#"
      DELETE FROM fetch_responses
      WHERE id IN (
       SELECT response_id FROM fetch_attempts
       WHERE created_at_ms >= $1 AND created_at_ms < $2 AND response_id IS NOT NULL
      )
      "#,
    )
    .bind(partition.start_ms())
    .bind(partition.end_ms())
    .execute(&mut *tx)
    .await?;

    sqlx::query(&format!(
      "DROP TABLE IF EXISTS {}",
      quote_ident(&partition.table_name())
    ))
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    self.forget(partition);
    info!(partition = %partition, "Ledger partition dropped");
    Ok(())
  }

  async fn prune_responses_before(
    &self,
    before_ms: i64
  ) -> Result<u64, StoreError> {
    let res = sqlx::query("DELETE FROM fetch_responses WHERE created_at_ms < $1")
      .bind(before_ms)
      .execute(&self.pool)
      .await?;
    Ok(res.rows_affected())
  }
}
