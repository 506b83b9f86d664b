//! Batch intake: runs every item
//! through guard, policy and gate,
//! fetches the survivors, emits the
//! follow-up event and flushes the
//! ledger once.
mod watchdog;

use std::collections::{
  HashMap,
  HashSet
};
use std::time::Instant;

use futures::{
  StreamExt,
  stream
};
use tracing::{
  debug,
  error,
  info
};

use crate::app::context::AppContext;
use crate::app::emit::emit;
use crate::app::fetch::execute_fetch;
use crate::app::guard::has_recent_attempt;
use crate::app::ledger::PendingInserts;
use crate::app::policy::{
  calculate_next_retry_at,
  should_skip
};
use crate::domain::backoff::{
  FollowUp,
  RetryState,
  follow_up_for
};
use crate::domain::events::FeedEvent;
use crate::domain::messages::{
  BatchItem,
  BatchRequest
};
use crate::domain::model::AttemptSource;
use crate::error::StoreError;
use crate::infra::metrics;
use crate::infra::time::format_epoch_ms;
use crate::ports::clock::Clock;
use crate::ports::http::Http;
use crate::ports::ledger::Ledger;

use watchdog::SlowBatchGuard;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemOutcome {
  /// Fetched recently, or repeated
  /// within the same batch.
  Deduplicated,
  BackingOff,
  Escalated,
  RateLimited,
  Completed,
  Failing,
  FailedDisable,
  Rejected,
  Errored,
}

impl ItemOutcome {
  pub fn as_str(self) -> &'static str {
    match self {
      | ItemOutcome::Deduplicated => "deduplicated",
      | ItemOutcome::BackingOff => "backing_off",
      | ItemOutcome::Escalated => "escalated",
      | ItemOutcome::RateLimited => "rate_limited",
      | ItemOutcome::Completed => "completed",
      | ItemOutcome::Failing => "failing",
      | ItemOutcome::FailedDisable => "failed_disable",
      | ItemOutcome::Rejected => "rejected",
      | ItemOutcome::Errored => "errored",
    }
  }

  fn from_follow_up(
    f: FollowUp
  ) -> Self {
    match f {
      | FollowUp::Completed => ItemOutcome::Completed,
      | FollowUp::Failing => ItemOutcome::Failing,
      | FollowUp::FailedDisable => ItemOutcome::FailedDisable,
      | FollowUp::Rejected => ItemOutcome::Rejected,
    }
  }
}

#[derive(Debug, Default, Clone)]
pub struct BatchReport {
  pub items: usize,
  pub outcomes: HashMap<ItemOutcome, usize>,
  pub rows_written: usize,
  pub flush_error: Option<String>,
  pub elapsed_ms: u64,
}

impl BatchReport {
  pub fn count(
    &self,
    outcome: ItemOutcome
  ) -> usize {
    self.outcomes.get(&outcome).copied().unwrap_or(0)
  }

  fn record(
    &mut self,
    outcome: ItemOutcome
  ) {
    *self.outcomes.entry(outcome).or_insert(0) += 1;
  }
}

pub async fn process_batch<L, H, C>(
  ctx: &AppContext<L, H, C>,
  batch: BatchRequest
) -> BatchReport
where
  L: Ledger + ?Sized,
  H: Http + ?Sized,
  C: Clock + ?Sized,
{
  let started = Instant::now();
  metrics::record_batch();

  let mut report = BatchReport {
    items: batch.items.len(),
    ..Default::default()
  };
  let _slow =
    SlowBatchGuard::arm(ctx.cfg.log_batch_warn_seconds, batch.items.len(), started);

  // The guard cannot see buffered rows,
  // so a key repeated in one batch only
  // runs once.
  let mut seen = HashSet::new();
  let mut work =
    Vec::with_capacity(batch.items.len());
  for item in batch.items {
    if seen.insert(item.lookup_key.clone()) {
      work.push(item);
    } else {
      debug!(url = %item.url, lookup_key = %item.lookup_key, "Duplicate lookup key in batch, skipping");
      metrics::record_skip("duplicate_in_batch");
      report.record(ItemOutcome::Deduplicated);
    }
  }

  let pending = PendingInserts::new();
  let rate_seconds = batch.rate_seconds;
  let enqueued_at_ms =
    batch.enqueued_at_ms;
  let parallelism =
    ctx.cfg.fetch.max_concurrent_fetches.max(1);

  let outcomes: Vec<ItemOutcome> = stream::iter(work)
    .map(|item| {
      let pending = &pending;
      async move {
        let item_started =
          Instant::now();
        let outcome = match process_item(ctx, pending, &item, rate_seconds).await {
          | Ok(o) => o,
          | Err(e) => {
            error!(
              url = %item.url,
              lookup_key = %item.lookup_key,
              elapsed_ms = item_started.elapsed().as_millis() as u64,
              error = %e,
              "Error processing item within batch"
            );
            ItemOutcome::Errored
          }
        };

        if let Some(enqueued_at_ms) = enqueued_at_ms {
          let now_ms =
            ctx.clock.now_epoch_ms().await;
          info!(
            url = %item.url,
            lookup_key = %item.lookup_key,
            outcome = outcome.as_str(),
            duration_ms = now_ms.saturating_sub(enqueued_at_ms),
            "Finished handling batch item"
          );
        }
        outcome
      }
    })
    .buffer_unordered(parallelism)
    .collect()
    .await;

  for outcome in outcomes {
    report.record(outcome);
  }

  let buffered = pending.len();
  match pending.flush(ctx.ledger.as_ref()).await {
    | Ok(rows) => report.rows_written = rows,
    | Err(e) => {
      error!(rows = buffered, error = %e, "Failed to flush ledger rows for batch");
      metrics::record_store_error("ledger");
      report.flush_error = Some(e.to_string());
    }
  }

  report.elapsed_ms = started.elapsed().as_millis() as u64;
  let now_ms =
    ctx.clock.now_epoch_ms().await;
  info!(
    batch_time = %format_epoch_ms(now_ms, &ctx.cfg.timezone),
    items = report.items,
    rows = report.rows_written,
    completed = report.count(ItemOutcome::Completed),
    failing = report.count(ItemOutcome::Failing) + report.count(ItemOutcome::FailedDisable),
    skipped = report.count(ItemOutcome::Deduplicated)
      + report.count(ItemOutcome::BackingOff)
      + report.count(ItemOutcome::Escalated)
      + report.count(ItemOutcome::RateLimited),
    errored = report.count(ItemOutcome::Errored),
    total_ms = report.elapsed_ms,
    "Fetch batch complete"
  );

  report
}

async fn process_item<L, H, C>(
  ctx: &AppContext<L, H, C>,
  pending: &PendingInserts,
  item: &BatchItem,
  rate_seconds: u64,
) -> Result<ItemOutcome, StoreError>
where
  L: Ledger + ?Sized,
  H: Http + ?Sized,
  C: Clock + ?Sized,
{
  let url = item.url.as_str();
  let lookup_key =
    item.lookup_key.as_str();
  let now_ms =
    ctx.clock.now_epoch_ms().await;

  if has_recent_attempt(
    ctx.ledger.as_ref(),
    lookup_key,
    rate_seconds,
    ctx.cfg.dedup.freshness_fraction,
    now_ms,
  )
  .await?
  {
    debug!(url, lookup_key, rate_seconds, "Recently fetched, skipping");
    metrics::record_skip("fresh");
    return Ok(ItemOutcome::Deduplicated);
  }

  let decision =
    should_skip(ctx, url, lookup_key, now_ms).await?;
  if decision.skip {
    let outcome = match decision.state {
      | RetryState::Escalated => ItemOutcome::Escalated,
      | _ => ItemOutcome::BackingOff,
    };
    metrics::record_skip(decision.state.as_str());
    return Ok(outcome);
  }

  if ctx.gate.check_url(url).await.limited {
    debug!(url, lookup_key, "Host over request budget, skipping");
    metrics::record_skip("rate_limited");
    return Ok(ItemOutcome::RateLimited);
  }

  let durable =
    ctx.cfg.response_store.always_durable || item.save_to_object_storage;
  let mut attempt =
    execute_fetch(ctx, url, lookup_key, &[], AttemptSource::Scheduled, durable).await;

  let retry = &ctx.cfg.retry;
  if attempt.status.participates_in_backoff() {
    let next =
      calculate_next_retry_at(attempt.created_at_ms, decision.failed_attempts, retry);
    attempt.next_retry_at_ms = Some(next);
    debug!(
      url,
      lookup_key,
      status = attempt.status.as_str(),
      next_retry = %format_epoch_ms(next, &ctx.cfg.timezone),
      "Fetch failed, retry scheduled"
    );
  }

  let follow_up =
    follow_up_for(attempt.status, decision.failed_attempts, retry.max_fail_attempts);
  pending.mark_for_persistence(attempt);

  let lookup_key =
    lookup_key.to_string();
  let url = url.to_string();
  let event = match follow_up {
    | FollowUp::Completed => FeedEvent::FetchCompleted {
      lookup_key,
      url,
      rate_seconds,
    },
    | FollowUp::Failing => FeedEvent::UrlFailing { lookup_key, url },
    | FollowUp::FailedDisable => FeedEvent::UrlFailedDisable { lookup_key, url },
    | FollowUp::Rejected => FeedEvent::UrlRejectedDisable { lookup_key, url },
  };
  emit(ctx.events.as_ref(), event).await;

  Ok(ItemOutcome::from_follow_up(follow_up))
}
