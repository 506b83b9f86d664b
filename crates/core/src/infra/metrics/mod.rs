//! Minimal Prometheus text endpoint for
//! orchestrator runtime stats.

mod histogram;
mod render;
mod server;

use std::collections::HashMap;
use std::sync::atomic::{
  AtomicU64,
  Ordering
};
use std::sync::{
  Arc,
  Mutex,
  OnceLock
};
use std::time::{
  SystemTime,
  UNIX_EPOCH
};

use histogram::Histogram;

use crate::domain::model::MetricsConfig;

const FETCH_BUCKETS_MS: [u64; 9] = [25, 50, 100, 250, 500, 1000, 2000, 5000, 10000];

const FLUSH_BUCKETS_MS: [u64; 9] = [1, 2, 5, 10, 25, 50, 100, 250, 500];

#[derive(Debug)]
pub struct Metrics {
  start_time_seconds: u64,
  batches: AtomicU64,
  inflight_fetches: AtomicU64,
  attempts_by_status: Mutex<HashMap<String, u64>>,
  events_by_name: Mutex<HashMap<String, u64>>,
  skips_by_reason: Mutex<HashMap<String, u64>>,
  store_errors: Mutex<HashMap<String, u64>>,
  fetch_latency: Mutex<HashMap<String, Histogram>>,
  flush_latency: Mutex<Histogram>,
  flushed_rows: AtomicU64,
}

static METRICS: OnceLock<Arc<Metrics>> = OnceLock::new();

impl Metrics {
  fn new() -> Self {
    let start_time_seconds = SystemTime::now()
      .duration_since(UNIX_EPOCH)
      .unwrap_or_default()
      .as_secs();

    Self {
      start_time_seconds,
      batches: AtomicU64::new(0),
      inflight_fetches: AtomicU64::new(0),
      attempts_by_status: Mutex::new(HashMap::new()),
      events_by_name: Mutex::new(HashMap::new()),
      skips_by_reason: Mutex::new(HashMap::new()),
      store_errors: Mutex::new(HashMap::new()),
      fetch_latency: Mutex::new(HashMap::new()),
      flush_latency: Mutex::new(Histogram::new(FLUSH_BUCKETS_MS.len())),
      flushed_rows: AtomicU64::new(0),
    }
  }

  fn render(&self) -> String {
    render::render(self)
  }
}

pub async fn init(
  cfg: &MetricsConfig
) -> Result<(), String> {
  if !cfg.enabled {
    return Ok(());
  }

  let metrics =
    Arc::new(Metrics::new());
  METRICS
    .set(metrics.clone())
    .map_err(|_| "metrics already initialized".to_string())?;

  server::spawn(&cfg.bind, metrics).await
}

fn bump(
  map: &Mutex<HashMap<String, u64>>,
  key: &str
) {
  if let Ok(mut m) = map.lock() {
    *m.entry(key.to_string()).or_insert(0) += 1;
  }
}

pub fn record_batch() {
  if let Some(metrics) = METRICS.get() {
    metrics.batches.fetch_add(1, Ordering::Relaxed);
  }
}

pub fn record_attempt(
  status: &str,
  latency_ms: u64
) {
  let Some(metrics) = METRICS.get() else {
    return;
  };

  bump(&metrics.attempts_by_status, status);

  if let Ok(mut latency) = metrics.fetch_latency.lock() {
    latency
      .entry(status.to_string())
      .or_insert_with(|| Histogram::new(FETCH_BUCKETS_MS.len()))
      .observe(latency_ms, &FETCH_BUCKETS_MS);
  }
}

pub fn record_event(name: &str) {
  if let Some(metrics) = METRICS.get() {
    bump(&metrics.events_by_name, name);
  }
}

pub fn record_skip(reason: &str) {
  if let Some(metrics) = METRICS.get() {
    bump(&metrics.skips_by_reason, reason);
  }
}

pub fn record_store_error(store: &str) {
  if let Some(metrics) = METRICS.get() {
    bump(&metrics.store_errors, store);
  }
}

pub fn record_flush(
  rows: usize,
  elapsed_ms: u64
) {
  let Some(metrics) = METRICS.get() else {
    return;
  };

  metrics
    .flushed_rows
    .fetch_add(rows as u64, Ordering::Relaxed);
  if let Ok(mut hist) = metrics.flush_latency.lock() {
    hist.observe(elapsed_ms, &FLUSH_BUCKETS_MS);
  }
}

pub fn record_inflight_start() -> InFlightGuard {
  let Some(metrics) = METRICS.get() else {
    return InFlightGuard { enabled: false };
  };

  metrics.inflight_fetches.fetch_add(1, Ordering::Relaxed);
  InFlightGuard { enabled: true }
}

pub struct InFlightGuard {
  enabled: bool,
}

impl Drop for InFlightGuard {
  fn drop(&mut self) {
    if !self.enabled {
      return;
    }
    if let Some(metrics) = METRICS.get() {
      metrics.inflight_fetches.fetch_sub(1, Ordering::Relaxed);
    }
  }
}
