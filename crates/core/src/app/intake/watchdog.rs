use std::time::{
  Duration,
  Instant
};

use tokio::sync::oneshot;
use tracing::warn;

/// Warns once if a batch is still
/// running after `warn_after_seconds`.
/// Dropping the guard disarms it.
pub struct SlowBatchGuard {
  _done: Option<oneshot::Sender<()>>,
}

impl SlowBatchGuard {
  pub fn arm(
    warn_after_seconds: u64,
    items: usize,
    started: Instant
  ) -> Self {
    if warn_after_seconds == 0 {
      return Self { _done: None };
    }

    let (tx, rx) =
      oneshot::channel::<()>();
    tokio::spawn(async move {
      let sleep =
        tokio::time::sleep(Duration::from_secs(warn_after_seconds));
      tokio::pin!(sleep);
      tokio::select! {
        _ = &mut sleep => {
          warn!(
            items,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Fetch batch still running"
          );
        }
        _ = rx => {}
      }
    });
    Self { _done: Some(tx) }
  }
}
