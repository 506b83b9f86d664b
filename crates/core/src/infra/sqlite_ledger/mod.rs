//! SQLite ledger. Partitions are
//! logical: every row carries the month
//! key it belongs to and
//! `ledger_partitions` records which
//! months exist.
mod connection;
mod migrations;

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use chrono_tz::Tz;
use sqlx::{
  QueryBuilder,
  Sqlite,
  SqliteConnection,
  SqlitePool
};
use tracing::{
  debug,
  info
};

pub use connection::wipe_database_file;

use crate::domain::model::{
  AttemptFilter,
  FetchAttempt,
  StoredResponse
};
use crate::domain::partition::MonthPartition;
use crate::error::StoreError;
use crate::infra::clock::SystemClock;
use crate::infra::ledger_rows::{
  ATTEMPT_SELECT,
  AttemptRecord,
  INSERT_CHUNK,
  into_attempts
};
use crate::infra::time::epoch_ms_to_iso;
use crate::ports::clock::Clock;
use crate::ports::ledger::Ledger;

pub struct SqliteLedger {
  pool: SqlitePool,
  zone: Tz,
  /// Stamps
  /// `ledger_partitions.created_at_ms`.
  clock: Arc<dyn Clock>,
}

impl SqliteLedger {
  pub async fn new(
    db_path: &Path,
    zone: Tz
  ) -> Result<Self, StoreError> {
    let pool =
      connection::create_pool(db_path).await?;
    Ok(Self {
      pool,
      zone,
      clock: Arc::new(SystemClock),
    })
  }

  /// Fresh private database; gone when
  /// the ledger is dropped.
  pub async fn in_memory() -> Result<Self, StoreError> {
    let pool =
      connection::create_memory_pool().await?;
    Ok(Self {
      pool,
      zone: chrono_tz::UTC,
      clock: Arc::new(SystemClock),
    })
  }

  pub fn with_clock(
    mut self,
    clock: Arc<dyn Clock>
  ) -> Self {
    self.clock = clock;
    self
  }
}

async fn register_partition(
  conn: &mut SqliteConnection,
  partition: MonthPartition,
  now_ms: i64,
) -> Result<bool, StoreError> {
  let res = sqlx::query(
    r#"
    INSERT OR IGNORE INTO ledger_partitions(partition_key, range_start_ms, range_end_ms, created_at_ms)
    VALUES (?1, ?2, ?3, ?4)
    "#,
  )
  .bind(partition.key())
  .bind(partition.start_ms())
  .bind(partition.end_ms())
  .bind(now_ms)
  .execute(conn)
  .await?;
  Ok(res.rows_affected() > 0)
}

#[async_trait::async_trait]
impl Ledger for SqliteLedger {
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

    let now_ms =
      self.clock.now_epoch_ms().await;
    let mut tx =
      self.pool.begin().await?;

    let months: BTreeSet<MonthPartition> = attempts
      .iter()
      .map(|a| MonthPartition::containing(a.created_at_ms))
      .collect();
    for month in months {
      if register_partition(&mut tx, month, now_ms).await? {
        info!(partition = %month, "Ledger partition created on insert");
      }
    }

    let responses: Vec<&StoredResponse> =
      attempts.iter().filter_map(|a| a.response.as_ref()).collect();
    for chunk in responses.chunks(INSERT_CHUNK) {
      let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
        "INSERT INTO fetch_responses(id, status_code, text_hash, is_from_known_cdn, etag, \
         last_modified, location_tier, location_key, created_at_ms) ",
      );
      qb.push_values(chunk, |mut b, r| {
        b.push_bind(r.id.as_str())
          .push_bind(i64::from(r.status_code))
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
      let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
        "INSERT INTO fetch_attempts(id, partition_key, url, lookup_key, status, source, \
         created_at_ms, created_at_text, next_retry_at_ms, error_message, http_status, response_id) ",
      );
      qb.push_values(chunk, |mut b, a| {
        b.push_bind(a.id.as_str())
          .push_bind(MonthPartition::containing(a.created_at_ms).key())
          .push_bind(a.url.as_str())
          .push_bind(a.lookup_key.as_str())
          .push_bind(a.status.as_str())
          .push_bind(a.source.as_str())
          .push_bind(a.created_at_ms)
          .push_bind(epoch_ms_to_iso(a.created_at_ms, &self.zone))
          .push_bind(a.next_retry_at_ms)
          .push_bind(a.error_message.as_deref())
          .push_bind(a.http_status.map(i64::from))
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
      "{ATTEMPT_SELECT} WHERE a.lookup_key = ?1 AND a.status = 'ok' \
       ORDER BY a.created_at_ms DESC, a.rowid DESC LIMIT 1"
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
      "{ATTEMPT_SELECT} WHERE a.lookup_key = ?1 \
       ORDER BY a.created_at_ms DESC, a.rowid DESC LIMIT 1"
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
      WHERE lookup_key = ?1 AND next_retry_at_ms IS NOT NULL
      ORDER BY created_at_ms DESC, rowid DESC
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
      WHERE lookup_key = ?1
       AND source = 'scheduled'
       AND status NOT IN ('ok', 'refused_oversized')
       AND (?2 IS NULL OR created_at_ms > ?2)
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
    let hit: Option<i64> = sqlx::query_scalar(
      r#"
      SELECT 1
      FROM fetch_attempts
      WHERE lookup_key = ?1 AND source = 'scheduled' AND created_at_ms > ?2
      LIMIT 1
      "#,
    )
    .bind(lookup_key)
    .bind(since_ms)
    .fetch_optional(&self.pool)
    .await?;
    Ok(hit.is_some())
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
      "{ATTEMPT_SELECT} WHERE {column} = ?1 \
       ORDER BY a.created_at_ms DESC, a.rowid DESC LIMIT ?2 OFFSET ?3"
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
    let keys: Vec<String> =
      sqlx::query_scalar("SELECT partition_key FROM ledger_partitions ORDER BY partition_key")
        .fetch_all(&self.pool)
        .await?;
    keys.iter()
      .map(|k| {
        MonthPartition::parse_key(k).ok_or_else(|| StoreError::Corrupt(format!("partition key '{k}'")))
      })
      .collect()
  }

  async fn ensure_partition(
    &self,
    partition: MonthPartition
  ) -> Result<bool, StoreError> {
    let now_ms =
      self.clock.now_epoch_ms().await;
    let mut conn =
      self.pool.acquire().await?;
    register_partition(&mut conn, partition, now_ms).await
  }

  async fn drop_partition(
    &self,
    partition: MonthPartition
  ) -> Result<(), StoreError> {
    let key = partition.key();
    let mut tx =
      self.pool.begin().await?;

    sqlx::query(
      r#"
      DELETE FROM fetch_responses
      WHERE id IN (
       SELECT response_id FROM fetch_attempts
       WHERE partition_key = ?1 AND response_id IS NOT NULL
      )
      "#,
    )
    .bind(&key)
    .execute(&mut *tx)
    .await?;

    let removed = sqlx::query("DELETE FROM fetch_attempts WHERE partition_key = ?1")
      .bind(&key)
      .execute(&mut *tx)
      .await?
      .rows_affected();

    sqlx::query("DELETE FROM ledger_partitions WHERE partition_key = ?1")
      .bind(&key)
      .execute(&mut *tx)
      .await?;

    tx.commit().await?;
    info!(partition = %partition, rows = removed, "Ledger partition dropped");
    Ok(())
  }

  async fn prune_responses_before(
    &self,
    before_ms: i64
  ) -> Result<u64, StoreError> {
    let res = sqlx::query("DELETE FROM fetch_responses WHERE created_at_ms < ?1")
      .bind(before_ms)
      .execute(&self.pool)
      .await?;
    Ok(res.rows_affected())
  }
}
