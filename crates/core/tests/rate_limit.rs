use std::sync::Arc;
use std::time::Duration;

use feedgate_core::domain::model::HostRateLimit;
use feedgate_core::infra::memory::MemoryCounterStore;
use feedgate_core::infra::rate_limit::RateLimitGate;

fn sec_gate() -> RateLimitGate {
  let limits = [HostRateLimit {
    host: "data.sec.gov".into(),
    request_limit: 10,
    interval_seconds: 2,
  }];
  RateLimitGate::new(Arc::new(MemoryCounterStore::new()), &limits)
}

#[tokio::test(start_paused = true)]
async fn eleventh_call_in_window_is_limited() {
  let gate = sec_gate();
  for _ in 0..10 {
    assert!(!gate.check_url("https://data.sec.gov/a.json").await.limited);
  }
  assert!(gate.check_url("https://data.sec.gov/b.json").await.limited);

  tokio::time::advance(Duration::from_millis(2_001)).await;
  assert!(!gate.check_url("https://data.sec.gov/c.json").await.limited);
}

#[tokio::test(start_paused = true)]
async fn concurrent_callers_share_one_budget() {
  let gate = Arc::new(sec_gate());
  let calls: Vec<_> = (0..25)
    .map(|_| {
      let gate = Arc::clone(&gate);
      tokio::spawn(async move { gate.check_and_increment("DATA.SEC.GOV").await.limited })
    })
    .collect();

  let mut allowed = 0;
  for call in calls {
    if !call.await.unwrap() {
      allowed += 1;
    }
  }
  assert_eq!(allowed, 10);
}
