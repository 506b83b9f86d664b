#![allow(dead_code)]

use std::collections::{
  HashMap,
  VecDeque
};
use std::path::Path;
use std::sync::atomic::{
  AtomicUsize,
  Ordering
};
use std::sync::{
  Arc,
  Mutex
};
use std::time::Duration;

use feedgate_core::app::context::AppContext;
use feedgate_core::domain::model::{
  AttemptSource,
  AttemptStatus,
  FetchAttempt,
  FetchResult
};
use feedgate_core::infra::clock::ManualClock;
use feedgate_core::infra::config::ConfigLoader;
use feedgate_core::infra::memory::{
  MemoryBlobStore,
  MemoryCacheStore,
  MemoryCounterStore,
  RecordingPublisher
};
use feedgate_core::infra::rate_limit::RateLimitGate;
use feedgate_core::infra::response_store::ResponseTierStore;
use feedgate_core::infra::sqlite_ledger::SqliteLedger;
use feedgate_core::ports::blob_store::BlobStore;
use feedgate_core::ports::http::Http;
use feedgate_core::ports::ledger::Ledger;

// 2026-10-15T00:00:00Z
pub const OCT_15: i64 = 1_792_022_400_000;
pub const MINUTE_MS: i64 = 60_000;

/// Replays queued results per URL;
/// unscripted URLs answer 200 with a
/// small feed.
#[derive(Default)]
pub struct ScriptedHttp {
  script: Mutex<HashMap<String, VecDeque<FetchResult>>>,
  calls: AtomicUsize,
  headers_seen: Mutex<Vec<Vec<(String, String)>>>,
}

impl ScriptedHttp {
  pub fn push(
    &self,
    url: &str,
    result: FetchResult
  ) {
    self.script
      .lock()
      .unwrap()
      .entry(url.to_string())
      .or_default()
      .push_back(result);
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }

  /// Request headers of every call, in
  /// call order.
  pub fn headers_seen(
    &self
  ) -> Vec<Vec<(String, String)>> {
    self.headers_seen.lock().unwrap().clone()
  }
}

#[async_trait::async_trait]
impl Http for ScriptedHttp {
  async fn fetch(
    &self,
    url: &str
  ) -> FetchResult {
    self.calls.fetch_add(1, Ordering::SeqCst);
    let queued = self
      .script
      .lock()
      .unwrap()
      .get_mut(url)
      .and_then(VecDeque::pop_front);
    queued.unwrap_or_else(|| ok_body("<rss><channel/></rss>"))
  }

  async fn fetch_with_headers(
    &self,
    url: &str,
    headers: &[(String, String)]
  ) -> FetchResult {
    self.headers_seen.lock().unwrap().push(headers.to_vec());
    self.fetch(url).await
  }
}

pub fn ok_body(
  body: &str
) -> FetchResult {
  FetchResult {
    status: Some(AttemptStatus::Ok),
    status_code: Some(200),
    body: Some(body.to_string()),
    latency_ms: 5,
    ..Default::default()
  }
}

pub fn bad_status(
  code: u16
) -> FetchResult {
  FetchResult {
    status: Some(AttemptStatus::BadStatusCode),
    status_code: Some(code),
    body: Some("nope".to_string()),
    latency_ms: 5,
    ..Default::default()
  }
}

pub fn failed(
  status: AttemptStatus
) -> FetchResult {
  FetchResult {
    status: Some(status),
    error_message: Some(format!("{} from test", status.as_str())),
    latency_ms: 5,
    ..Default::default()
  }
}

pub struct Harness<L: Ledger = SqliteLedger> {
  pub ctx: AppContext<L, ScriptedHttp, ManualClock>,
  pub http: Arc<ScriptedHttp>,
  pub clock: Arc<ManualClock>,
  pub events: Arc<RecordingPublisher>,
  pub blobs: Arc<MemoryBlobStore>,
}

pub async fn harness(
  config: &str,
  rate_limits: Option<&str>
) -> Harness {
  harness_with(config, rate_limits, |ledger| ledger).await
}

/// Like `harness`, with the migrated
/// SQLite ledger wrapped by `wrap`.
pub async fn harness_with<L, F>(
  config: &str,
  rate_limits: Option<&str>,
  wrap: F
) -> Harness<L>
where
  L: Ledger,
  F: FnOnce(SqliteLedger) -> L,
{
  let cfg =
    ConfigLoader::parse(config, rate_limits, Path::new("/tmp/feedgate/config.toml")).unwrap();

  let http =
    Arc::new(ScriptedHttp::default());
  let clock =
    Arc::new(ManualClock::at(OCT_15));

  let ledger =
    SqliteLedger::in_memory().await.unwrap().with_clock(clock.clone());
  ledger.migrate().await.unwrap();
  let ledger = wrap(ledger);
  let events =
    Arc::new(RecordingPublisher::new());
  let blobs =
    Arc::new(MemoryBlobStore::new());

  let gate =
    RateLimitGate::new(Arc::new(MemoryCounterStore::new()), &cfg.rate_limits);
  let responses = ResponseTierStore::new(
    Arc::new(MemoryCacheStore::new()),
    Some(blobs.clone() as Arc<dyn BlobStore>),
    Duration::from_secs(cfg.response_store.cache_ttl_seconds),
  );

  let ctx = AppContext {
    cfg: Arc::new(cfg),
    ledger: Arc::new(ledger),
    http: http.clone(),
    clock: clock.clone(),
    gate: Arc::new(gate),
    responses: Arc::new(responses),
    events: events.clone(),
  };

  Harness {
    ctx,
    http,
    clock,
    events,
    blobs,
  }
}

pub fn prior_attempt(
  key: &str,
  status: AttemptStatus,
  at_ms: i64
) -> FetchAttempt {
  FetchAttempt {
    id: uuid::Uuid::new_v4().to_string(),
    url: key.to_string(),
    lookup_key: key.to_string(),
    status,
    source: AttemptSource::Scheduled,
    created_at_ms: at_ms,
    next_retry_at_ms: status.participates_in_backoff().then_some(at_ms + 5 * MINUTE_MS),
    error_message: None,
    http_status: None,
    response: None,
  }
}

pub async fn seed(
  h: &Harness,
  attempts: &[FetchAttempt]
) {
  h.ctx.ledger.insert_attempts(attempts).await.unwrap();
}
