mod common;

use common::{
  MINUTE_MS,
  OCT_15,
  bad_status,
  failed,
  harness,
  harness_with,
  prior_attempt,
  seed
};
use feedgate_core::app::intake::{
  ItemOutcome,
  process_batch
};
use feedgate_core::app::policy::count_failed_requests;
use feedgate_core::domain::messages::{
  BatchItem,
  BatchRequest
};
use feedgate_core::domain::model::{
  AttemptFilter,
  AttemptStatus,
  FetchAttempt,
  ResponseLocation
};
use feedgate_core::domain::partition::MonthPartition;
use feedgate_core::error::StoreError;
use feedgate_core::infra::sqlite_ledger::SqliteLedger;
use feedgate_core::ports::ledger::Ledger;

const FEED: &str = "https://a.test/rss";

fn batch(
  rate_seconds: u64,
  urls: &[&str]
) -> BatchRequest {
  BatchRequest {
    enqueued_at_ms: None,
    rate_seconds,
    items: urls.iter().map(|u| BatchItem::new(*u, None)).collect(),
  }
}

async fn rows_for(
  h: &common::Harness,
  key: &str
) -> usize {
  h.ctx
    .ledger
    .list_recent(&AttemptFilter::LookupKey(key.into()), 100, 0)
    .await
    .unwrap()
    .len()
}

#[tokio::test]
async fn escalated_key_is_not_fetched() {
  let h =
    harness("[retry]\nmax_fail_attempts = 3\n", None).await;
  seed(
    &h,
    &[
      prior_attempt(FEED, AttemptStatus::BadStatusCode, OCT_15 - 30 * MINUTE_MS),
      prior_attempt(FEED, AttemptStatus::BadStatusCode, OCT_15 - 20 * MINUTE_MS),
      prior_attempt(FEED, AttemptStatus::BadStatusCode, OCT_15 - 10 * MINUTE_MS),
    ],
  )
  .await;

  let report =
    process_batch(&h.ctx, batch(60, &[FEED])).await;

  assert_eq!(h.http.calls(), 0);
  assert_eq!(report.count(ItemOutcome::Escalated), 1);
  assert_eq!(report.rows_written, 0);
  assert_eq!(h.events.names(), vec!["url.failed.disable"]);
  assert_eq!(rows_for(&h, FEED).await, 3);
}

#[tokio::test]
async fn recent_attempt_suppresses_item() {
  let h = harness("", None).await;
  seed(&h, &[prior_attempt(FEED, AttemptStatus::Ok, OCT_15 - 5_000)]).await;

  let report =
    process_batch(&h.ctx, batch(100, &[FEED])).await;

  assert_eq!(report.count(ItemOutcome::Deduplicated), 1);
  assert_eq!(h.http.calls(), 0);
  assert!(h.events.events().is_empty());
  assert_eq!(rows_for(&h, FEED).await, 1);
}

#[tokio::test]
async fn attempt_outside_window_proceeds() {
  let h = harness("", None).await;
  seed(&h, &[prior_attempt(FEED, AttemptStatus::Ok, OCT_15 - 80_000)]).await;

  let report =
    process_batch(&h.ctx, batch(100, &[FEED])).await;

  assert_eq!(report.count(ItemOutcome::Completed), 1);
  assert_eq!(report.rows_written, 1);
  assert_eq!(h.events.names(), vec!["fetch.completed"]);
  assert_eq!(rows_for(&h, FEED).await, 2);
}

#[tokio::test]
async fn failures_back_off_then_retry() {
  let h = harness("", None).await;
  h.http.push(FEED, bad_status(500));
  h.http.push(FEED, bad_status(503));

  let first =
    process_batch(&h.ctx, batch(1, &[FEED])).await;
  assert_eq!(first.count(ItemOutcome::Failing), 1);
  let latest =
    h.ctx.ledger.latest_attempt(FEED).await.unwrap().unwrap();
  assert_eq!(latest.next_retry_at_ms, Some(OCT_15 + 5 * MINUTE_MS));
  assert_eq!(latest.http_status, Some(500));

  h.clock.advance_ms(2_000);
  let held =
    process_batch(&h.ctx, batch(1, &[FEED])).await;
  assert_eq!(held.count(ItemOutcome::BackingOff), 1);
  assert_eq!(h.http.calls(), 1);

  h.clock.set(OCT_15 + 5 * MINUTE_MS + 1);
  let retried =
    process_batch(&h.ctx, batch(1, &[FEED])).await;
  assert_eq!(retried.count(ItemOutcome::Failing), 1);
  let latest =
    h.ctx.ledger.latest_attempt(FEED).await.unwrap().unwrap();
  assert_eq!(latest.next_retry_at_ms, Some(OCT_15 + 5 * MINUTE_MS + 1 + 10 * MINUTE_MS));

  assert_eq!(h.events.names(), vec!["url.failing", "url.failing"]);
  assert_eq!(count_failed_requests(h.ctx.ledger.as_ref(), FEED).await.unwrap(), 2);
}

#[tokio::test]
async fn threshold_failure_requests_disable() {
  let h =
    harness("[retry]\nmax_fail_attempts = 3\n", None).await;
  seed(
    &h,
    &[
      prior_attempt(FEED, AttemptStatus::FetchError, OCT_15 - 60 * MINUTE_MS),
      prior_attempt(FEED, AttemptStatus::FetchTimeout, OCT_15 - 40 * MINUTE_MS),
    ],
  )
  .await;
  h.http.push(FEED, failed(AttemptStatus::FetchError));

  let report =
    process_batch(&h.ctx, batch(60, &[FEED])).await;

  assert_eq!(report.count(ItemOutcome::FailedDisable), 1);
  assert_eq!(h.events.names(), vec!["url.failed.disable"]);
  assert_eq!(rows_for(&h, FEED).await, 3);
}

#[tokio::test]
async fn oversized_feed_is_rejected_without_retry() {
  let h = harness("", None).await;
  h.http.push(FEED, failed(AttemptStatus::RefusedOversized));

  let report =
    process_batch(&h.ctx, batch(60, &[FEED])).await;

  assert_eq!(report.count(ItemOutcome::Rejected), 1);
  assert_eq!(h.events.names(), vec!["url.rejected.disable"]);
  let latest =
    h.ctx.ledger.latest_attempt(FEED).await.unwrap().unwrap();
  assert_eq!(latest.status, AttemptStatus::RefusedOversized);
  assert_eq!(latest.next_retry_at_ms, None);
  assert_eq!(count_failed_requests(h.ctx.ledger.as_ref(), FEED).await.unwrap(), 0);
}

#[tokio::test]
async fn recovery_resets_failure_count() {
  let h = harness("", None).await;
  seed(
    &h,
    &[
      prior_attempt(FEED, AttemptStatus::FetchError, OCT_15 - 4 * MINUTE_MS),
      prior_attempt(FEED, AttemptStatus::BadStatusCode, OCT_15 - 3 * MINUTE_MS),
      prior_attempt(FEED, AttemptStatus::Ok, OCT_15 - 2 * MINUTE_MS),
      prior_attempt(FEED, AttemptStatus::ParseError, OCT_15 - MINUTE_MS),
    ],
  )
  .await;

  assert_eq!(count_failed_requests(h.ctx.ledger.as_ref(), FEED).await.unwrap(), 1);
}

#[tokio::test]
async fn duplicate_keys_in_one_batch_fetch_once() {
  let h = harness("", None).await;

  let report = process_batch(&h.ctx, batch(60, &[FEED, FEED, "https://b.test/rss"])).await;

  assert_eq!(report.items, 3);
  assert_eq!(report.count(ItemOutcome::Deduplicated), 1);
  assert_eq!(report.count(ItemOutcome::Completed), 2);
  assert_eq!(report.rows_written, 2);
  assert_eq!(h.http.calls(), 2);
}

#[tokio::test]
async fn throttled_host_items_leave_no_trace() {
  let limits = r#"
    [[hosts]]
    host = "data.sec.gov"
    request_limit = 10
    interval_seconds = 2
  "#;
  let h =
    harness("", Some(limits)).await;
  let urls: Vec<String> = (0..11)
    .map(|i| format!("https://data.sec.gov/filings/{i}.json"))
    .collect();
  let refs: Vec<&str> =
    urls.iter().map(String::as_str).collect();

  let report =
    process_batch(&h.ctx, batch(600, &refs)).await;

  assert_eq!(report.count(ItemOutcome::Completed), 10);
  assert_eq!(report.count(ItemOutcome::RateLimited), 1);
  assert_eq!(report.rows_written, 10);
  assert_eq!(h.events.names().len(), 10);
}

#[tokio::test]
async fn object_storage_flag_forces_blob_tier() {
  let h =
    harness("[response_store]\nalways_durable = false\n", None).await;
  let mut req = batch(60, &[FEED, "https://b.test/rss"]);
  req.items[0].save_to_object_storage = true;

  process_batch(&h.ctx, req).await;

  let flagged =
    h.ctx.ledger.latest_attempt(FEED).await.unwrap().unwrap();
  let plain = h.ctx.ledger.latest_attempt("https://b.test/rss").await.unwrap().unwrap();
  assert!(matches!(flagged.response.unwrap().location, ResponseLocation::Blob { .. }));
  assert!(matches!(plain.response.unwrap().location, ResponseLocation::Cache { .. }));
  assert_eq!(h.blobs.len(), 1);
}

/// SQLite ledger that fails lookups for
/// one key, or every insert.
struct FlakyLedger {
  inner: SqliteLedger,
  failing_key: Option<&'static str>,
  fail_inserts: bool,
}

impl FlakyLedger {
  fn check(
    &self,
    lookup_key: &str
  ) -> Result<(), StoreError> {
    match self.failing_key {
      | Some(k) if k == lookup_key => Err(StoreError::backend("lookup", "connection reset")),
      | _ => Ok(()),
    }
  }
}

#[async_trait::async_trait]
impl Ledger for FlakyLedger {
  async fn migrate(
    &self
  ) -> Result<(), StoreError> {
    self.inner.migrate().await
  }

  async fn insert_attempts(
    &self,
    attempts: &[FetchAttempt]
  ) -> Result<(), StoreError> {
    if self.fail_inserts {
      return Err(StoreError::backend("insert", "disk full"));
    }
    self.inner.insert_attempts(attempts).await
  }

  async fn latest_ok(
    &self,
    lookup_key: &str
  ) -> Result<Option<FetchAttempt>, StoreError> {
    self.check(lookup_key)?;
    self.inner.latest_ok(lookup_key).await
  }

  async fn latest_attempt(
    &self,
    lookup_key: &str
  ) -> Result<Option<FetchAttempt>, StoreError> {
    self.check(lookup_key)?;
    self.inner.latest_attempt(lookup_key).await
  }

  async fn latest_next_retry_at(
    &self,
    lookup_key: &str
  ) -> Result<Option<i64>, StoreError> {
    self.check(lookup_key)?;
    self.inner.latest_next_retry_at(lookup_key).await
  }

  async fn count_failed_since(
    &self,
    lookup_key: &str,
    since_ms: Option<i64>
  ) -> Result<u64, StoreError> {
    self.check(lookup_key)?;
    self.inner.count_failed_since(lookup_key, since_ms).await
  }

  async fn has_any_since(
    &self,
    lookup_key: &str,
    since_ms: i64
  ) -> Result<bool, StoreError> {
    self.check(lookup_key)?;
    self.inner.has_any_since(lookup_key, since_ms).await
  }

  async fn list_recent(
    &self,
    filter: &AttemptFilter,
    limit: u32,
    offset: u32,
  ) -> Result<Vec<FetchAttempt>, StoreError> {
    self.inner.list_recent(filter, limit, offset).await
  }

  async fn list_partitions(
    &self
  ) -> Result<Vec<MonthPartition>, StoreError> {
    self.inner.list_partitions().await
  }

  async fn ensure_partition(
    &self,
    partition: MonthPartition
  ) -> Result<bool, StoreError> {
    self.inner.ensure_partition(partition).await
  }

  async fn drop_partition(
    &self,
    partition: MonthPartition
  ) -> Result<(), StoreError> {
    self.inner.drop_partition(partition).await
  }

  async fn prune_responses_before(
    &self,
    before_ms: i64
  ) -> Result<u64, StoreError> {
    self.inner.prune_responses_before(before_ms).await
  }
}

#[tokio::test]
async fn ledger_error_on_one_item_spares_its_siblings() {
  const BROKEN: &str = "https://broken.test/rss";
  let h = harness_with("", None, |inner| FlakyLedger {
    inner,
    failing_key: Some(BROKEN),
    fail_inserts: false,
  })
  .await;

  let report = process_batch(&h.ctx, batch(60, &[FEED, BROKEN, "https://b.test/rss"])).await;

  assert_eq!(report.items, 3);
  assert_eq!(report.count(ItemOutcome::Errored), 1);
  assert_eq!(report.count(ItemOutcome::Completed), 2);
  assert_eq!(report.rows_written, 2);
  assert!(report.flush_error.is_none());
  assert_eq!(h.http.calls(), 2);
  assert_eq!(h.events.names(), vec!["fetch.completed", "fetch.completed"]);
  assert_eq!(rows_for_key(&h.ctx.ledger.inner, FEED).await, 1);
}

#[tokio::test]
async fn failed_flush_is_reported_not_raised() {
  let h = harness_with("", None, |inner| FlakyLedger {
    inner,
    failing_key: None,
    fail_inserts: true,
  })
  .await;

  let report = process_batch(&h.ctx, batch(60, &[FEED, "https://b.test/rss"])).await;

  assert_eq!(report.count(ItemOutcome::Completed), 2);
  assert_eq!(report.rows_written, 0);
  let message =
    report.flush_error.expect("flush error recorded");
  assert!(message.contains("disk full"));
  assert_eq!(rows_for_key(&h.ctx.ledger.inner, FEED).await, 0);
}

async fn rows_for_key(
  ledger: &SqliteLedger,
  key: &str
) -> usize {
  ledger
    .list_recent(&AttemptFilter::LookupKey(key.into()), 100, 0)
    .await
    .unwrap()
    .len()
}
