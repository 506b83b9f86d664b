//! Ledger housekeeping: keeps the
//! current and upcoming monthly
//! partitions in place, drops
//! partitions past retention and prunes
//! old response rows.
use tracing::{
  info,
  warn
};

use crate::domain::model::LedgerSettings;
use crate::domain::partition::MonthPartition;
use crate::error::StoreError;
use crate::infra::time::epoch_ms_to_utc_iso;
use crate::ports::clock::Clock;
use crate::ports::ledger::Ledger;

const DAY_MS: i64 = 86_400_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
  /// First run of a process; the next
  /// partition is created regardless of
  /// the lead window.
  Startup,
  Interval,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
  pub created: Vec<MonthPartition>,
  pub dropped: Vec<MonthPartition>,
  pub responses_pruned: u64,
}

/// Oldest partition bound that survives
/// retention.
pub fn retention_horizon_ms(
  now_ms: i64,
  retention_months: u32
) -> i64 {
  let months =
    i32::try_from(retention_months).unwrap_or(i32::MAX);
  MonthPartition::containing(now_ms)
    .add_months(months.saturating_neg())
    .start_ms()
}

pub fn within_lead_window(
  now_ms: i64,
  lead_days: u32
) -> bool {
  let rollover_ms =
    MonthPartition::containing(now_ms).end_ms();
  rollover_ms - now_ms <= i64::from(lead_days) * DAY_MS
}

pub async fn run_maintenance<L, C>(
  ledger: &L,
  clock: &C,
  settings: &LedgerSettings,
  trigger: Trigger,
) -> Result<MaintenanceReport, StoreError>
where
  L: Ledger + ?Sized,
  C: Clock + ?Sized,
{
  let now_ms =
    clock.now_epoch_ms().await;
  let current =
    MonthPartition::containing(now_ms);
  let mut report =
    MaintenanceReport::default();

  if ledger.ensure_partition(current).await? {
    report.created.push(current);
  }

  let next = current.next();
  if (trigger == Trigger::Startup || within_lead_window(now_ms, settings.partition_lead_days))
    && ledger.ensure_partition(next).await?
  {
    report.created.push(next);
  }

  let horizon_ms =
    retention_horizon_ms(now_ms, settings.retention_months);
  for partition in ledger.list_partitions().await? {
    if partition.end_ms() > horizon_ms {
      continue;
    }
    match ledger.drop_partition(partition).await {
      | Ok(()) => report.dropped.push(partition),
      | Err(e) => warn!(partition = %partition, error = %e, "Failed to drop expired ledger partition"),
    }
  }

  let prune_before_ms =
    now_ms.saturating_sub(i64::from(settings.response_retention_days) * DAY_MS);
  report.responses_pruned = ledger.prune_responses_before(prune_before_ms).await?;

  info!(
    current = %current,
    created = report.created.len(),
    dropped = report.dropped.len(),
    responses_pruned = report.responses_pruned,
    horizon = %epoch_ms_to_utc_iso(horizon_ms),
    "Ledger maintenance complete"
  );
  Ok(report)
}
