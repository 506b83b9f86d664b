use std::time::Duration;

use crate::error::StoreError;

#[async_trait::async_trait]
pub trait CounterStore: Send + Sync {
  /// Atomically increments `key` and
  /// attaches `ttl` only when the
  /// counter was just created. Returns
  /// the post-increment count.
  async fn increment_with_ttl(
    &self,
    key: &str,
    ttl: Duration
  ) -> Result<u64, StoreError>;
}
