//! Retry state machine for a lookup
//! key. Everything here is pure: the
//! policy feeds it ledger facts and
//! acts on the answer.
use crate::domain::model::{
  AttemptStatus,
  RetrySettings
};

const MINUTE_MS: i64 = 60_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
  /// No failures since the last OK
  /// attempt.
  Healthy,
  /// Failing, and the latest retry time
  /// is still ahead.
  BackingOff { until_ms: i64 },
  /// Failing, but the backoff window
  /// has elapsed.
  Eligible,
  /// Reached the failure threshold;
  /// retries stop.
  Escalated,
}

impl RetryState {
  pub fn skips_fetch(self) -> bool {
    matches!(self, RetryState::BackingOff { .. } | RetryState::Escalated)
  }

  pub fn as_str(self) -> &'static str {
    match self {
      | RetryState::Healthy => "healthy",
      | RetryState::BackingOff { .. } => "backing_off",
      | RetryState::Eligible => "eligible",
      | RetryState::Escalated => "escalated",
    }
  }
}

/// Decides the retry state from the
/// failure count since the latest OK
/// attempt and the most recent recorded
/// retry time.
pub fn decide_retry_state(
  failed_attempts: u64,
  latest_next_retry_at_ms: Option<i64>,
  now_ms: i64,
  max_fail_attempts: u32,
) -> RetryState {
  if failed_attempts == 0 {
    return RetryState::Healthy;
  }
  if failed_attempts >= u64::from(max_fail_attempts) {
    return RetryState::Escalated;
  }
  match latest_next_retry_at_ms {
    | Some(until_ms) if now_ms < until_ms => RetryState::BackingOff { until_ms },
    | _ => RetryState::Eligible,
  }
}

/// `reference + base * 2^min(attempts,
/// max_fail_attempts)` minutes.
pub fn next_retry_at_ms(
  reference_ms: i64,
  attempts_so_far: u64,
  settings: &RetrySettings
) -> i64 {
  let exponent =
    attempts_so_far.min(u64::from(settings.max_fail_attempts)) as u32;
  reference_ms.saturating_add(wait_ms(settings.base_wait_minutes, exponent))
}

/// Widest gap the policy can ever leave
/// between two attempts.
pub fn longest_backoff_ms(
  settings: &RetrySettings
) -> i64 {
  wait_ms(settings.base_wait_minutes, settings.max_fail_attempts)
}

fn wait_ms(
  base_wait_minutes: u64,
  exponent: u32
) -> i64 {
  let minutes =
    base_wait_minutes.saturating_mul(2u64.saturating_pow(exponent));
  i64::try_from(minutes)
    .unwrap_or(i64::MAX)
    .saturating_mul(MINUTE_MS)
}

/// Event that follows a completed
/// fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowUp {
  Completed,
  Failing,
  FailedDisable,
  Rejected,
}

pub fn follow_up_for(
  status: AttemptStatus,
  failed_attempts: u64,
  max_fail_attempts: u32
) -> FollowUp {
  match status {
    | AttemptStatus::Ok => FollowUp::Completed,
    | AttemptStatus::RefusedOversized => FollowUp::Rejected,
    | _ if failed_attempts + 1 >= u64::from(max_fail_attempts) => FollowUp::FailedDisable,
    | _ => FollowUp::Failing,
  }
}
