//! In-process adapters for the counter,
//! cache, blob and event ports. Used
//! for single-instance runs and by the
//! test suites.
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;
use tracing::debug;

use crate::domain::events::FeedEvent;
use crate::error::{
  PublishError,
  StoreError
};
use crate::ports::blob_store::BlobStore;
use crate::ports::cache_store::CacheStore;
use crate::ports::counter_store::CounterStore;
use crate::ports::event_bus::EventPublisher;

fn poisoned(
  op: &'static str
) -> StoreError {
  StoreError::backend(op, "lock poisoned")
}

/// Fixed-window counters. The expiry is
/// set once, when a counter is created,
/// and the whole check runs under one
/// lock.
#[derive(Default)]
pub struct MemoryCounterStore {
  counters: Mutex<HashMap<String, (u64, Instant)>>,
}

impl MemoryCounterStore {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait::async_trait]
impl CounterStore for MemoryCounterStore {
  async fn increment_with_ttl(
    &self,
    key: &str,
    ttl: Duration
  ) -> Result<u64, StoreError> {
    let now = Instant::now();
    let mut counters =
      self.counters.lock().map_err(|_| poisoned("counter increment"))?;
    let entry = counters
      .entry(key.to_string())
      .and_modify(|(count, expires_at)| {
        if *expires_at <= now {
          *count = 0;
          *expires_at = now + ttl;
        }
      })
      .or_insert((0, now + ttl));
    entry.0 += 1;
    Ok(entry.0)
  }
}

#[derive(Default)]
pub struct MemoryCacheStore {
  entries: Mutex<HashMap<String, (Vec<u8>, Instant)>>,
}

impl MemoryCacheStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn len(&self) -> usize {
    self.entries.lock().map(|e| e.len()).unwrap_or(0)
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

#[async_trait::async_trait]
impl CacheStore for MemoryCacheStore {
  async fn set_with_ttl(
    &self,
    key: &str,
    value: Vec<u8>,
    ttl: Duration
  ) -> Result<(), StoreError> {
    let mut entries =
      self.entries.lock().map_err(|_| poisoned("cache set"))?;
    let now = Instant::now();
    // Writes sweep expired keys.
    entries.retain(|_, (_, expires_at)| *expires_at > now);
    entries.insert(key.to_string(), (value, now + ttl));
    Ok(())
  }

  async fn get(
    &self,
    key: &str
  ) -> Result<Option<Vec<u8>>, StoreError> {
    let mut entries =
      self.entries.lock().map_err(|_| poisoned("cache get"))?;
    let now = Instant::now();
    match entries.get(key) {
      | Some((value, expires_at)) if *expires_at > now => Ok(Some(value.clone())),
      | Some(_) => {
        entries.remove(key);
        Ok(None)
      }
      | None => Ok(None),
    }
  }
}

#[derive(Default)]
pub struct MemoryBlobStore {
  objects: Mutex<HashMap<String, Bytes>>,
}

impl MemoryBlobStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn len(&self) -> usize {
    self.objects.lock().map(|o| o.len()).unwrap_or(0)
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

#[async_trait::async_trait]
impl BlobStore for MemoryBlobStore {
  async fn put(
    &self,
    key: &str,
    data: Bytes
  ) -> Result<(), StoreError> {
    let mut objects =
      self.objects.lock().map_err(|_| poisoned("blob put"))?;
    objects.insert(key.to_string(), data);
    Ok(())
  }

  async fn get(
    &self,
    key: &str
  ) -> Result<Option<Bytes>, StoreError> {
    let objects =
      self.objects.lock().map_err(|_| poisoned("blob get"))?;
    Ok(objects.get(key).cloned())
  }
}

/// Keeps every published event; handy
/// for assertions.
#[derive(Default)]
pub struct RecordingPublisher {
  events: Mutex<Vec<FeedEvent>>,
}

impl RecordingPublisher {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn events(
    &self
  ) -> Vec<FeedEvent> {
    self.events.lock().map(|e| e.clone()).unwrap_or_default()
  }

  pub fn names(
    &self
  ) -> Vec<&'static str> {
    self.events().iter().map(FeedEvent::name).collect()
  }
}

#[async_trait::async_trait]
impl EventPublisher for RecordingPublisher {
  async fn publish(
    &self,
    event: &FeedEvent
  ) -> Result<(), PublishError> {
    let mut events = self
      .events
      .lock()
      .map_err(|_| PublishError::Broker("lock poisoned".into()))?;
    events.push(event.clone());
    Ok(())
  }
}

/// Drops events after logging them. The
/// query API fetches manually and never
/// emits, but the context still needs a
/// publisher.
#[derive(Default)]
pub struct DiscardPublisher;

#[async_trait::async_trait]
impl EventPublisher for DiscardPublisher {
  async fn publish(
    &self,
    event: &FeedEvent
  ) -> Result<(), PublishError> {
    debug!(event = event.name(), url = event.url(), "Event discarded");
    Ok(())
  }
}
