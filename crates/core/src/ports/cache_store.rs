use std::time::Duration;

use crate::error::StoreError;

/// Short-lived key/value tier for
/// compressed response bodies.
#[async_trait::async_trait]
pub trait CacheStore: Send + Sync {
  async fn set_with_ttl(
    &self,
    key: &str,
    value: Vec<u8>,
    ttl: Duration
  ) -> Result<(), StoreError>;

  async fn get(
    &self,
    key: &str
  ) -> Result<Option<Vec<u8>>, StoreError>;
}
