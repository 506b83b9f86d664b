//! Write buffer in front of the ledger:
//! attempts from one batch land in a
//! single transaction.
use std::sync::{
  Mutex,
  MutexGuard,
  PoisonError
};
use std::time::Instant;

use tracing::debug;

use crate::domain::model::FetchAttempt;
use crate::error::StoreError;
use crate::infra::metrics;
use crate::ports::ledger::Ledger;

#[derive(Default)]
pub struct PendingInserts {
  buffer: Mutex<Vec<FetchAttempt>>,
}

impl PendingInserts {
  pub fn new() -> Self {
    Self::default()
  }

  /// Ignores poisoning: buffered rows
  /// are never left half-written.
  fn rows(
    &self
  ) -> MutexGuard<'_, Vec<FetchAttempt>> {
    self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn mark_for_persistence(
    &self,
    attempt: FetchAttempt
  ) {
    self.rows().push(attempt);
  }

  pub fn len(&self) -> usize {
    self.rows().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Writes and clears the buffer.
  /// Returns the number of rows
  /// written; an empty buffer never
  /// touches the ledger.
  pub async fn flush<L>(
    &self,
    ledger: &L
  ) -> Result<usize, StoreError>
  where
    L: Ledger + ?Sized,
  {
    let rows =
      std::mem::take(&mut *self.rows());
    if rows.is_empty() {
      return Ok(0);
    }

    let started = Instant::now();
    ledger.insert_attempts(&rows).await?;
    let elapsed_ms =
      started.elapsed().as_millis() as u64;

    metrics::record_flush(rows.len(), elapsed_ms);
    debug!(rows = rows.len(), elapsed_ms, "Pending inserts flushed");
    Ok(rows.len())
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use super::*;
  use crate::domain::model::{
    AttemptSource,
    AttemptStatus
  };
  use crate::infra::sqlite_ledger::SqliteLedger;

  fn attempt(id: &str) -> FetchAttempt {
    FetchAttempt {
      id: id.into(),
      url: "https://a.test/rss".into(),
      lookup_key: "a".into(),
      status: AttemptStatus::Ok,
      source: AttemptSource::Scheduled,
      created_at_ms: 1_792_022_400_000,
      next_retry_at_ms: None,
      error_message: None,
      http_status: None,
      response: None,
    }
  }

  #[tokio::test]
  async fn poisoned_buffer_still_collects_and_flushes() {
    let pending =
      Arc::new(PendingInserts::new());
    pending.mark_for_persistence(attempt("before"));

    let poisoner = Arc::clone(&pending);
    let joined = std::thread::spawn(move || {
      let _guard =
        poisoner.buffer.lock().unwrap();
      panic!("worker died holding the buffer");
    })
    .join();
    assert!(joined.is_err());
    assert!(pending.buffer.is_poisoned());

    pending.mark_for_persistence(attempt("after"));
    assert_eq!(pending.len(), 2);

    let ledger =
      SqliteLedger::in_memory().await.unwrap();
    ledger.migrate().await.unwrap();
    assert_eq!(pending.flush(&ledger).await.unwrap(), 2);
    assert!(pending.is_empty());
    assert!(ledger.latest_attempt("a").await.unwrap().is_some());
  }
}
