//! Persistence port for the request
//! ledger. Attempts are partitioned by
//! creation month; adapters route
//! inserts to the right partition.
use crate::domain::model::{
  AttemptFilter,
  FetchAttempt
};
use crate::domain::partition::MonthPartition;
use crate::error::StoreError;

#[async_trait::async_trait]
pub trait Ledger: Send + Sync {
  async fn migrate(
    &self
  ) -> Result<(), StoreError>;

  /// Writes every attempt and its
  /// response metadata in one
  /// transaction.
  async fn insert_attempts(
    &self,
    attempts: &[FetchAttempt]
  ) -> Result<(), StoreError>;

  async fn latest_ok(
    &self,
    lookup_key: &str
  ) -> Result<Option<FetchAttempt>, StoreError>;

  async fn latest_attempt(
    &self,
    lookup_key: &str
  ) -> Result<Option<FetchAttempt>, StoreError>;

  /// Most recent non-null
  /// `next_retry_at_ms` for the key.
  async fn latest_next_retry_at(
    &self,
    lookup_key: &str
  ) -> Result<Option<i64>, StoreError>;

  /// Scheduled attempts that
  /// participate in backoff, created
  /// strictly after `since_ms` (all of
  /// them when `None`).
  async fn count_failed_since(
    &self,
    lookup_key: &str,
    since_ms: Option<i64>
  ) -> Result<u64, StoreError>;

  /// Whether a scheduled attempt exists
  /// created strictly after `since_ms`.
  async fn has_any_since(
    &self,
    lookup_key: &str,
    since_ms: i64
  ) -> Result<bool, StoreError>;

  /// Newest first.
  async fn list_recent(
    &self,
    filter: &AttemptFilter,
    limit: u32,
    offset: u32,
  ) -> Result<Vec<FetchAttempt>, StoreError>;

  async fn list_partitions(
    &self
  ) -> Result<Vec<MonthPartition>, StoreError>;

  /// Returns `true` when the partition
  /// had to be created.
  async fn ensure_partition(
    &self,
    partition: MonthPartition
  ) -> Result<bool, StoreError>;

  async fn drop_partition(
    &self,
    partition: MonthPartition
  ) -> Result<(), StoreError>;

  /// Deletes response metadata created
  /// before `before_ms`; returns rows
  /// removed.
  async fn prune_responses_before(
    &self,
    before_ms: i64
  ) -> Result<u64, StoreError>;
}
