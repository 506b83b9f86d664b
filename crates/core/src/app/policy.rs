//! Retry/backoff policy over the
//! ledger.
use tracing::{
  debug,
  error
};

use crate::app::context::AppContext;
use crate::app::emit::emit;
use crate::domain::backoff::{
  RetryState,
  decide_retry_state,
  next_retry_at_ms
};
use crate::domain::events::FeedEvent;
use crate::domain::model::RetrySettings;
use crate::error::StoreError;
use crate::infra::time::epoch_ms_to_iso;
use crate::ports::clock::Clock;
use crate::ports::http::Http;
use crate::ports::ledger::Ledger;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyDecision {
  pub skip: bool,
  pub state: RetryState,
  pub failed_attempts: u64,
  pub next_retry_at_ms: Option<i64>,
}

/// Scheduled failures since the most
/// recent OK attempt of any source.
pub async fn count_failed_requests<L>(
  ledger: &L,
  lookup_key: &str
) -> Result<u64, StoreError>
where
  L: Ledger + ?Sized,
{
  let since_ms =
    ledger.latest_ok(lookup_key).await?.map(|a| a.created_at_ms);
  ledger.count_failed_since(lookup_key, since_ms).await
}

/// Decides whether `lookup_key` is held
/// back by earlier failures. An
/// escalated key emits one
/// `url.failed.disable` per call.
pub async fn should_skip<L, H, C>(
  ctx: &AppContext<L, H, C>,
  url: &str,
  lookup_key: &str,
  now_ms: i64,
) -> Result<PolicyDecision, StoreError>
where
  L: Ledger + ?Sized,
  H: Http + ?Sized,
  C: Clock + ?Sized,
{
  let max_fail_attempts =
    ctx.cfg.retry.max_fail_attempts;
  let failed_attempts =
    count_failed_requests(ctx.ledger.as_ref(), lookup_key).await?;

  // The latest retry time only matters
  // between the two thresholds.
  let latest_next_retry = if failed_attempts > 0 && failed_attempts < u64::from(max_fail_attempts) {
    let latest =
      ctx.ledger.latest_next_retry_at(lookup_key).await?;
    if latest.is_none() {
      error!(
        url,
        lookup_key,
        failed_attempts,
        "Lookup key has failed before but has no retry time recorded, fetching anyway"
      );
    }
    latest
  } else {
    None
  };

  let state =
    decide_retry_state(failed_attempts, latest_next_retry, now_ms, max_fail_attempts);

  match state {
    | RetryState::Escalated => {
      emit(
        ctx.events.as_ref(),
        FeedEvent::UrlFailedDisable {
          lookup_key: lookup_key.to_string(),
          url: url.to_string(),
        },
      )
      .await;
    }
    | RetryState::BackingOff { until_ms } => {
      debug!(
        url,
        lookup_key,
        failed_attempts,
        until = %epoch_ms_to_iso(until_ms, &ctx.cfg.timezone),
        "Recently failed, skipping until retry time"
      );
    }
    | RetryState::Healthy | RetryState::Eligible => {}
  }

  Ok(PolicyDecision {
    skip: state.skips_fetch(),
    state,
    failed_attempts,
    next_retry_at_ms: match state {
      | RetryState::BackingOff { until_ms } => Some(until_ms),
      | _ => latest_next_retry,
    },
  })
}

pub fn calculate_next_retry_at(
  reference_ms: i64,
  attempts_so_far: u64,
  settings: &RetrySettings
) -> i64 {
  next_retry_at_ms(reference_ms, attempts_so_far, settings)
}
