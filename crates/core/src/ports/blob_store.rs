use bytes::Bytes;

use crate::error::StoreError;

/// Durable object storage. A missing
/// key is `Ok(None)`, not an error.
#[async_trait::async_trait]
pub trait BlobStore: Send + Sync {
  async fn put(
    &self,
    key: &str,
    data: Bytes
  ) -> Result<(), StoreError>;

  async fn get(
    &self,
    key: &str
  ) -> Result<Option<Bytes>, StoreError>;
}
