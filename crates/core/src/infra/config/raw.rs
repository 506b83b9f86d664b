use serde::Deserialize;

use super::defaults::*;

#[derive(Debug, Deserialize)]
pub(crate) struct RawAppFile {
  #[serde(default)]
  pub app: RawApp,
  #[serde(default)]
  pub database: RawDatabase,
  #[serde(default)]
  pub sqlite: RawSqlite,
  #[serde(default)]
  pub postgres: Option<RawPostgres>,
  #[serde(default)]
  pub fetch: RawFetch,
  #[serde(default)]
  pub retry: RawRetry,
  #[serde(default)]
  pub dedup: RawDedup,
  #[serde(default)]
  pub ledger: RawLedger,
  #[serde(default)]
  pub response_store: RawResponseStore,
  #[serde(default)]
  pub cache: RawCache,
  #[serde(default)]
  pub blob: RawBlob,
  #[serde(default)]
  pub broker: RawBroker,
  #[serde(default)]
  pub logging: RawLogging,
  #[serde(default)]
  pub metrics: Option<RawMetrics>,
  #[serde(default)]
  pub server: RawServer,
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct RawApp {
  pub mode: Option<String>,
  pub timezone: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct RawDatabase {
  #[serde(default)]
  pub dialect: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawSqlite {
  #[serde(default = "default_sqlite_path")]
  pub path: String,
}

impl Default for RawSqlite {
  fn default() -> Self {
    Self {
      path: default_sqlite_path(),
    }
  }
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawPostgres {
  #[serde(default = "default_pg_user")]
  pub user: String,
  #[serde(default = "default_pg_password")]
  pub password: String,
  #[serde(default = "default_pg_host")]
  pub host: String,
  #[serde(default = "default_pg_port")]
  pub port: u16,
  #[serde(default = "default_pg_database")]
  pub db: String,
  #[serde(default = "default_pg_schema")]
  pub schema: String,
}

impl Default for RawPostgres {
  fn default() -> Self {
    Self {
      user: default_pg_user(),
      password: default_pg_password(),
      host: default_pg_host(),
      port: default_pg_port(),
      db: default_pg_database(),
      schema: default_pg_schema(),
    }
  }
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawFetch {
  #[serde(default = "default_user_agent")]
  pub user_agent: String,
  #[serde(default = "default_accept")]
  pub accept: String,
  #[serde(default = "default_timeout_ms")]
  pub timeout_ms: u64,
  #[serde(default = "default_max_body_bytes")]
  pub max_body_bytes: u64,
  #[serde(default = "default_max_concurrent_fetches")]
  pub max_concurrent_fetches: usize,
  #[serde(default = "default_known_cdn_servers")]
  pub known_cdn_servers: Vec<String>,
  #[serde(default)]
  pub proxy_url: Option<String>,
}

impl Default for RawFetch {
  fn default() -> Self {
    Self {
      user_agent: default_user_agent(),
      accept: default_accept(),
      timeout_ms: default_timeout_ms(),
      max_body_bytes: default_max_body_bytes(),
      max_concurrent_fetches: default_max_concurrent_fetches(),
      known_cdn_servers: default_known_cdn_servers(),
      proxy_url: None,
    }
  }
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawRetry {
  #[serde(default = "default_base_wait_minutes")]
  pub base_wait_minutes: u64,
  #[serde(default = "default_max_fail_attempts")]
  pub max_fail_attempts: u32,
}

impl Default for RawRetry {
  fn default() -> Self {
    Self {
      base_wait_minutes: default_base_wait_minutes(),
      max_fail_attempts: default_max_fail_attempts(),
    }
  }
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawDedup {
  #[serde(default = "default_freshness_fraction")]
  pub freshness_fraction: f64,
}

impl Default for RawDedup {
  fn default() -> Self {
    Self {
      freshness_fraction: default_freshness_fraction(),
    }
  }
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawLedger {
  #[serde(default = "default_retention_months")]
  pub retention_months: u32,
  #[serde(default = "default_partition_lead_days")]
  pub partition_lead_days: u32,
  #[serde(default = "default_response_retention_days")]
  pub response_retention_days: u32,
  #[serde(default = "default_maintenance_interval_seconds")]
  pub maintenance_interval_seconds: u64,
}

impl Default for RawLedger {
  fn default() -> Self {
    Self {
      retention_months: default_retention_months(),
      partition_lead_days: default_partition_lead_days(),
      response_retention_days: default_response_retention_days(),
      maintenance_interval_seconds: default_maintenance_interval_seconds(),
    }
  }
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawResponseStore {
  #[serde(default = "default_cache_ttl_seconds")]
  pub cache_ttl_seconds: u64,
  #[serde(default = "default_always_durable")]
  pub always_durable: bool,
  #[serde(default = "default_key_prefix")]
  pub key_prefix: String,
}

impl Default for RawResponseStore {
  fn default() -> Self {
    Self {
      cache_ttl_seconds: default_cache_ttl_seconds(),
      always_durable: default_always_durable(),
      key_prefix: default_key_prefix(),
    }
  }
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct RawCache {
  pub backend: Option<String>,
  pub redis_url: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct RawBlob {
  pub backend: Option<String>,
  pub fs_root: Option<String>,
  pub s3_bucket: Option<String>,
  pub s3_region: Option<String>,
  pub s3_endpoint: Option<String>,
  pub s3_access_key_id: Option<String>,
  pub s3_secret_access_key: Option<String>,
  pub s3_prefix: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawBroker {
  #[serde(default = "default_broker_url")]
  pub url: String,
  #[serde(default = "default_batch_queue")]
  pub batch_queue: String,
  #[serde(default = "default_single_queue")]
  pub single_queue: String,
  #[serde(default = "default_consumer_tag")]
  pub consumer_tag: String,
  #[serde(default = "default_max_concurrent_batches")]
  pub max_concurrent_batches: u16,
}

impl Default for RawBroker {
  fn default() -> Self {
    Self {
      url: default_broker_url(),
      batch_queue: default_batch_queue(),
      single_queue: default_single_queue(),
      consumer_tag: default_consumer_tag(),
      max_concurrent_batches: default_max_concurrent_batches(),
    }
  }
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawLogging {
  pub level: Option<String>,
  #[serde(default = "default_batch_warn_seconds")]
  pub batch_warn_seconds: u64,
}

impl Default for RawLogging {
  fn default() -> Self {
    Self {
      level: None,
      batch_warn_seconds: default_batch_warn_seconds(),
    }
  }
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawMetrics {
  #[serde(default = "default_metrics_enabled")]
  pub enabled: bool,
  #[serde(default = "default_metrics_bind")]
  pub bind: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawServer {
  #[serde(default = "default_server_host")]
  pub host: String,
  #[serde(default = "default_server_port")]
  pub port: u16,
  pub api_key: Option<String>,
}

impl Default for RawServer {
  fn default() -> Self {
    Self {
      host: default_server_host(),
      port: default_server_port(),
      api_key: None,
    }
  }
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct RawRateLimitsFile {
  #[serde(default)]
  pub hosts: Vec<RawHostLimit>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawHostLimit {
  pub host: String,
  pub request_limit: u64,
  pub interval_seconds: u64,
}
