//! Freshness check: a lookup key
//! fetched recently enough is not
//! fetched again.
use crate::error::StoreError;
use crate::ports::ledger::Ledger;

/// Width of the freshness window in
/// milliseconds, rounded to whole
/// seconds.
pub fn freshness_window_ms(
  rate_seconds: u64,
  freshness_fraction: f64
) -> i64 {
  let seconds =
    (rate_seconds as f64 * freshness_fraction).round();
  (seconds as i64).saturating_mul(1000)
}

pub async fn has_recent_attempt<L>(
  ledger: &L,
  lookup_key: &str,
  rate_seconds: u64,
  freshness_fraction: f64,
  now_ms: i64,
) -> Result<bool, StoreError>
where
  L: Ledger + ?Sized,
{
  let since_ms =
    now_ms.saturating_sub(freshness_window_ms(rate_seconds, freshness_fraction));
  ledger.has_any_since(lookup_key, since_ms).await
}
