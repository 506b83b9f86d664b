use feedgate_core::app::maintenance::{
  Trigger,
  run_maintenance
};
use feedgate_core::domain::model::{
  AttemptFilter,
  AttemptSource,
  AttemptStatus,
  FetchAttempt,
  LedgerSettings,
  ResponseLocation,
  StoredResponse
};
use feedgate_core::domain::partition::MonthPartition;
use feedgate_core::infra::clock::ManualClock;
use feedgate_core::infra::sqlite_ledger::SqliteLedger;
use feedgate_core::ports::ledger::Ledger;

// 2026-10-15T00:00:00Z
const OCT_15: i64 = 1_792_022_400_000;
const DAY_MS: i64 = 86_400_000;

fn settings() -> LedgerSettings {
  LedgerSettings {
    retention_months: 3,
    partition_lead_days: 7,
    response_retention_days: 30,
    maintenance_interval_seconds: 3600,
  }
}

fn month(
  year: i32,
  month: u32
) -> MonthPartition {
  MonthPartition::new(year, month).unwrap()
}

fn attempt_with_response(
  id: &str,
  at_ms: i64
) -> FetchAttempt {
  FetchAttempt {
    id: id.into(),
    url: "https://a.test/rss".into(),
    lookup_key: "k".into(),
    status: AttemptStatus::Ok,
    source: AttemptSource::Scheduled,
    created_at_ms: at_ms,
    next_retry_at_ms: None,
    error_message: None,
    http_status: Some(200),
    response: Some(StoredResponse {
      id: format!("resp-{id}"),
      status_code: 200,
      text_hash: String::new(),
      is_from_known_cdn: false,
      etag: None,
      last_modified: None,
      location: ResponseLocation::Cache { key: "c".into() },
      created_at_ms: at_ms,
    }),
  }
}

async fn ledger() -> SqliteLedger {
  let l =
    SqliteLedger::in_memory().await.unwrap();
  l.migrate().await.unwrap();
  l
}

#[tokio::test]
async fn startup_creates_current_and_next() {
  let l = ledger().await;
  let clock = ManualClock::at(OCT_15);

  let report =
    run_maintenance(&l, &clock, &settings(), Trigger::Startup).await.unwrap();

  assert_eq!(report.created, vec![month(2026, 10), month(2026, 11)]);
  let again =
    run_maintenance(&l, &clock, &settings(), Trigger::Startup).await.unwrap();
  assert!(again.created.is_empty());
}

#[tokio::test]
async fn interval_run_waits_for_lead_window() {
  let l = ledger().await;
  let clock = ManualClock::at(OCT_15);

  let report =
    run_maintenance(&l, &clock, &settings(), Trigger::Interval).await.unwrap();
  assert_eq!(report.created, vec![month(2026, 10)]);

  clock.set(month(2026, 11).start_ms() - 3 * DAY_MS);
  let report =
    run_maintenance(&l, &clock, &settings(), Trigger::Interval).await.unwrap();
  assert_eq!(report.created, vec![month(2026, 11)]);
}

#[tokio::test]
async fn partitions_past_retention_are_dropped() {
  let l = ledger().await;
  l.insert_attempts(&[
    attempt_with_response("jun", month(2026, 6).start_ms() + DAY_MS),
    attempt_with_response("jul", month(2026, 7).start_ms() + DAY_MS),
    attempt_with_response("oct", OCT_15),
  ])
  .await
  .unwrap();
  let clock = ManualClock::at(OCT_15);

  let report =
    run_maintenance(&l, &clock, &settings(), Trigger::Interval).await.unwrap();

  assert_eq!(report.dropped, vec![month(2026, 6)]);
  let left =
    l.list_partitions().await.unwrap();
  assert_eq!(left, vec![month(2026, 7), month(2026, 10)]);
  // July is kept but its response
  // metadata is older than thirty days.
  assert_eq!(report.responses_pruned, 1);
  let rows = l
    .list_recent(&AttemptFilter::LookupKey("k".into()), 10, 0)
    .await
    .unwrap();
  assert_eq!(rows.len(), 2);
  assert!(rows.iter().find(|a| a.id == "jul").unwrap().response.is_none());
  assert!(rows.iter().find(|a| a.id == "oct").unwrap().response.is_some());
}
