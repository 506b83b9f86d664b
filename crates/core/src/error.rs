use thiserror::Error;

/// Failure talking to a storage backend
/// (ledger, cache, blob, counter).
#[derive(Debug, Error)]
pub enum StoreError {
  #[error("database: {0}")]
  Database(#[from] sqlx::Error),
  #[error("redis: {0}")]
  Redis(#[from] redis::RedisError),
  #[error("{op}: {message}")]
  Backend { op: &'static str, message: String },
  #[error("corrupt row: {0}")]
  Corrupt(String),
}

impl StoreError {
  pub fn backend(
    op: &'static str,
    err: impl std::fmt::Display
  ) -> Self {
    Self::Backend {
      op,
      message: err.to_string(),
    }
  }
}

#[derive(Debug, Error)]
pub enum PublishError {
  #[error("serialize event: {0}")]
  Serialize(#[from] serde_json::Error),
  #[error("broker: {0}")]
  Broker(String),
}
