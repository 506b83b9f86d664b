//! `Clock` adapters: wall time for the
//! binaries, a settable clock for tests
//! and replays.
use std::sync::atomic::{
  AtomicI64,
  Ordering
};

use crate::ports::clock::Clock;

#[derive(Default)]
pub struct SystemClock;

#[async_trait::async_trait]
impl Clock for SystemClock {
  async fn now_epoch_ms(&self) -> i64 {
    let now = std::time::SystemTime::now()
      .duration_since(std::time::UNIX_EPOCH)
      .unwrap_or_default();
    now.as_millis() as i64
  }
}

#[derive(Debug, Default)]
pub struct ManualClock {
  now_ms: AtomicI64,
}

impl ManualClock {
  pub fn at(now_ms: i64) -> Self {
    Self {
      now_ms: AtomicI64::new(now_ms),
    }
  }

  pub fn set(&self, now_ms: i64) {
    self.now_ms.store(now_ms, Ordering::SeqCst);
  }

  pub fn advance_ms(
    &self,
    delta_ms: i64
  ) {
    self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
  }
}

#[async_trait::async_trait]
impl Clock for ManualClock {
  async fn now_epoch_ms(&self) -> i64 {
    self.now_ms.load(Ordering::SeqCst)
  }
}
