use std::path::PathBuf;

use chrono_tz::Tz;
use serde::{
  Deserialize,
  Serialize
};

/// Terminal status of one fetch
/// attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
  Ok,
  BadStatusCode,
  FetchError,
  FetchTimeout,
  ParseError,
  RefusedOversized,
}

impl AttemptStatus {
  pub const ALL: [AttemptStatus; 6] = [
    AttemptStatus::Ok,
    AttemptStatus::BadStatusCode,
    AttemptStatus::FetchError,
    AttemptStatus::FetchTimeout,
    AttemptStatus::ParseError,
    AttemptStatus::RefusedOversized,
  ];

  pub fn as_str(self) -> &'static str {
    match self {
      | AttemptStatus::Ok => "ok",
      | AttemptStatus::BadStatusCode => "bad_status_code",
      | AttemptStatus::FetchError => "fetch_error",
      | AttemptStatus::FetchTimeout => "fetch_timeout",
      | AttemptStatus::ParseError => "parse_error",
      | AttemptStatus::RefusedOversized => "refused_oversized",
    }
  }

  pub fn parse(
    s: &str
  ) -> Option<Self> {
    Self::ALL.into_iter().find(|v| v.as_str() == s)
  }

  pub fn is_ok(self) -> bool {
    self == AttemptStatus::Ok
  }

  /// Failures that schedule a retry and
  /// count towards escalation.
  pub fn participates_in_backoff(
    self
  ) -> bool {
    !matches!(self, AttemptStatus::Ok | AttemptStatus::RefusedOversized)
  }
}

/// 2xx and 304 count as success.
pub fn classify_status_code(
  code: u16
) -> AttemptStatus {
  if (200..300).contains(&code) || code == 304 {
    AttemptStatus::Ok
  } else {
    AttemptStatus::BadStatusCode
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptSource {
  Scheduled,
  Manual,
}

impl AttemptSource {
  pub fn as_str(self) -> &'static str {
    match self {
      | AttemptSource::Scheduled => "scheduled",
      | AttemptSource::Manual => "manual",
    }
  }

  pub fn parse(
    s: &str
  ) -> Option<Self> {
    match s {
      | "scheduled" => Some(AttemptSource::Scheduled),
      | "manual" => Some(AttemptSource::Manual),
      | _ => None,
    }
  }
}

/// Where a compressed response body
/// lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "tier", rename_all = "snake_case")]
pub enum ResponseLocation {
  Cache { key: String },
  Blob { key: String },
}

impl ResponseLocation {
  pub fn tier(&self) -> &'static str {
    match self {
      | ResponseLocation::Cache { .. } => "cache",
      | ResponseLocation::Blob { .. } => "blob",
    }
  }

  pub fn key(&self) -> &str {
    match self {
      | ResponseLocation::Cache { key } | ResponseLocation::Blob { key } => key,
    }
  }

  pub fn from_parts(
    tier: &str,
    key: String
  ) -> Option<Self> {
    match tier {
      | "cache" => Some(ResponseLocation::Cache { key }),
      | "blob" => Some(ResponseLocation::Blob { key }),
      | _ => None,
    }
  }
}

/// Response metadata kept beside an
/// attempt. The body itself sits in the
/// response tier store under
/// `location`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredResponse {
  pub id: String,
  pub status_code: u16,
  pub text_hash: String,
  pub is_from_known_cdn: bool,
  pub etag: Option<String>,
  pub last_modified: Option<String>,
  pub location: ResponseLocation,
  pub created_at_ms: i64,
}

/// One ledger row. Never mutated after
/// it is buffered for persistence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchAttempt {
  pub id: String,
  pub url: String,
  pub lookup_key: String,
  pub status: AttemptStatus,
  pub source: AttemptSource,
  pub created_at_ms: i64,
  pub next_retry_at_ms: Option<i64>,
  pub error_message: Option<String>,
  pub http_status: Option<u16>,
  pub response: Option<StoredResponse>,
}

/// What the HTTP collaborator hands
/// back for one GET.
#[derive(Debug, Clone, Default)]
pub struct FetchResult {
  pub status: Option<AttemptStatus>,
  pub status_code: Option<u16>,
  pub body: Option<String>,
  pub etag: Option<String>,
  pub last_modified: Option<String>,
  pub server: Option<String>,
  pub error_message: Option<String>,
  pub latency_ms: u64,
}

impl FetchResult {
  pub fn attempt_status(
    &self
  ) -> AttemptStatus {
    self.status.unwrap_or(AttemptStatus::FetchError)
  }
}

/// Selects which attempts a listing
/// query returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptFilter {
  Url(String),
  LookupKey(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppMode {
  Dev,
  Prod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SqlDialect {
  Sqlite,
  Postgres,
}

#[derive(Debug, Clone)]
pub struct PostgresConfig {
  pub user: String,
  pub password: String,
  pub host: String,
  pub port: u16,
  pub database: String,
  pub schema: String,
}

#[derive(Debug, Clone)]
pub struct MetricsConfig {
  pub enabled: bool,
  pub bind: String,
}

#[derive(Debug, Clone)]
pub struct FetchSettings {
  pub user_agent: String,
  pub accept: String,
  pub timeout_ms: u64,
  pub max_body_bytes: u64,
  pub max_concurrent_fetches: usize,
  pub known_cdn_servers: Vec<String>,
  /// Retried through once when a host
  /// answers 429.
  pub proxy_url: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct RetrySettings {
  pub base_wait_minutes: u64,
  pub max_fail_attempts: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct DedupSettings {
  pub freshness_fraction: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct LedgerSettings {
  pub retention_months: u32,
  pub partition_lead_days: u32,
  pub response_retention_days: u32,
  pub maintenance_interval_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct ResponseStoreSettings {
  pub cache_ttl_seconds: u64,
  pub always_durable: bool,
  pub key_prefix: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheBackend {
  Memory,
  Redis { url: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlobBackend {
  Disabled,
  Memory,
  Filesystem {
    root: PathBuf,
  },
  S3 {
    bucket: String,
    region: String,
    endpoint: Option<String>,
    access_key_id: Option<String>,
    secret_access_key: Option<String>,
    prefix: Option<String>,
  },
}

#[derive(Debug, Clone)]
pub struct BrokerSettings {
  pub url: String,
  pub batch_queue: String,
  pub single_queue: String,
  pub consumer_tag: String,
  pub max_concurrent_batches: u16,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
  pub host: String,
  pub port: u16,
  pub api_key: Option<String>,
}

/// Request budget for a throttled host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostRateLimit {
  pub host: String,
  pub request_limit: u64,
  pub interval_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
  pub mode: AppMode,
  pub timezone: Tz,
  pub db_dialect: SqlDialect,
  pub sqlite_path: PathBuf,
  pub postgres: PostgresConfig,
  pub fetch: FetchSettings,
  pub retry: RetrySettings,
  pub dedup: DedupSettings,
  pub ledger: LedgerSettings,
  pub response_store: ResponseStoreSettings,
  pub cache: CacheBackend,
  pub blob: BlobBackend,
  pub broker: BrokerSettings,
  pub server: ServerSettings,
  pub log_level: String,
  pub log_batch_warn_seconds: u64,
  pub metrics: MetricsConfig,
  pub rate_limits: Vec<HostRateLimit>,
}
