//! Per-host request budgets over a
//! fixed window held in the counter
//! store.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{
  debug,
  warn
};

use crate::domain::model::HostRateLimit;
use crate::infra::config::url_host;
use crate::infra::metrics;
use crate::ports::counter_store::CounterStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
  pub limited: bool,
}

pub struct RateLimitGate {
  store: Arc<dyn CounterStore>,
  limits: HashMap<String, HostRateLimit>,
}

impl RateLimitGate {
  pub fn new(
    store: Arc<dyn CounterStore>,
    limits: &[HostRateLimit]
  ) -> Self {
    let limits = limits
      .iter()
      .map(|l| (l.host.to_ascii_lowercase(), l.clone()))
      .collect();
    Self { store, limits }
  }

  pub fn limit_for_host(
    &self,
    host: &str
  ) -> Option<&HostRateLimit> {
    self.limits.get(&host.to_ascii_lowercase())
  }

  pub fn limit_for_url(
    &self,
    url: &str
  ) -> Option<&HostRateLimit> {
    url_host(url).and_then(|h| self.limit_for_host(&h))
  }

  /// Counts one request against `host`.
  /// Unlisted hosts and counter-store
  /// failures never limit.
  pub async fn check_and_increment(
    &self,
    host: &str
  ) -> RateDecision {
    let Some(limit) = self.limit_for_host(host) else {
      return RateDecision { limited: false };
    };

    let key =
      format!("ratelimit:{}", limit.host);
    let ttl =
      Duration::from_secs(limit.interval_seconds.max(1));
    match self.store.increment_with_ttl(&key, ttl).await {
      | Ok(count) => {
        let limited =
          count > limit.request_limit;
        if limited {
          debug!(
            host = %limit.host,
            count,
            request_limit = limit.request_limit,
            interval_seconds = limit.interval_seconds,
            "Host over request budget"
          );
        }
        RateDecision { limited }
      }
      | Err(e) => {
        warn!(host = %limit.host, error = %e, "Rate counter unavailable, allowing request");
        metrics::record_store_error("rate_counter");
        RateDecision { limited: false }
      }
    }
  }

  pub async fn check_url(
    &self,
    url: &str
  ) -> RateDecision {
    match url_host(url) {
      | Some(host) => self.check_and_increment(&host).await,
      | None => RateDecision { limited: false },
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::StoreError;
  use crate::infra::memory::MemoryCounterStore;

  struct DownStore;

  #[async_trait::async_trait]
  impl CounterStore for DownStore {
    async fn increment_with_ttl(
      &self,
      _key: &str,
      _ttl: Duration
    ) -> Result<u64, StoreError> {
      Err(StoreError::backend("counter", "connection refused"))
    }
  }

  fn sec_limit() -> Vec<HostRateLimit> {
    vec![HostRateLimit {
      host: "data.sec.gov".into(),
      request_limit: 10,
      interval_seconds: 2,
    }]
  }

  #[tokio::test]
  async fn unlisted_hosts_are_never_limited() {
    let gate =
      RateLimitGate::new(Arc::new(MemoryCounterStore::new()), &sec_limit());
    for _ in 0..50 {
      assert!(!gate.check_and_increment("example.com").await.limited);
    }
  }

  #[tokio::test]
  async fn store_outage_fails_open() {
    let gate =
      RateLimitGate::new(Arc::new(DownStore), &sec_limit());
    assert!(!gate.check_and_increment("data.sec.gov").await.limited);
  }

  #[tokio::test]
  async fn host_lookup_ignores_case() {
    let gate =
      RateLimitGate::new(Arc::new(MemoryCounterStore::new()), &sec_limit());
    assert!(gate.limit_for_url("https://DATA.sec.gov/x.json").is_some());
    assert!(gate.limit_for_url("not a url").is_none());
  }
}
