//! Loads `config.toml` plus the sibling
//! `rate_limits.toml` and normalizes
//! them into `AppConfig`.
mod defaults;
mod parse;
mod paths;
mod raw;

use std::path::{
  Path,
  PathBuf
};
use std::time::Duration;

use chrono_tz::Tz;
use tokio::fs;

use crate::domain::backoff::longest_backoff_ms;
use crate::domain::model::{
  AppConfig,
  BrokerSettings,
  DedupSettings,
  FetchSettings,
  LedgerSettings,
  MetricsConfig,
  ResponseStoreSettings,
  RetrySettings,
  ServerSettings
};

pub use parse::url_host;
use parse::{
  non_empty,
  parse_blob,
  parse_cache,
  parse_dialect,
  parse_mode,
  parse_postgres,
  parse_rate_limits
};
use paths::resolve_relative;
use raw::{
  RawAppFile,
  RawMetrics,
  RawRateLimitsFile
};

const RATE_LIMITS_FILE: &str = "rate_limits.toml";

// Shortest month, used when checking
// the retention horizon.
const MIN_MONTH_MS: i64 = 28 * 86_400_000;
const MAX_MONTH_MS: i64 = 31 * 86_400_000;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  #[error("io: {0}")]
  Io(#[from] std::io::Error),
  #[error("toml: {0}")]
  Toml(#[from] toml::de::Error),
  #[error("invalid config: {0}")]
  Invalid(String),
}

pub struct ConfigLoader;

impl ConfigLoader {
  pub async fn load(
    config_path: &Path
  ) -> Result<AppConfig, ConfigError> {
    let base_dir = config_path
      .parent()
      .ok_or_else(|| ConfigError::Invalid("config path has no parent".into()))?;

    let app_content =
      fs::read_to_string(config_path).await?;

    let rate_limits_path =
      base_dir.join(RATE_LIMITS_FILE);
    let rate_limits_content = match fs::read_to_string(&rate_limits_path).await {
      | Ok(c) => Some(c),
      | Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
      | Err(e) => return Err(e.into()),
    };

    Self::parse(&app_content, rate_limits_content.as_deref(), config_path)
  }

  /// Parses already-read file contents;
  /// paths resolve against
  /// `config_path`.
  pub fn parse(
    app_content: &str,
    rate_limits_content: Option<&str>,
    config_path: &Path,
  ) -> Result<AppConfig, ConfigError> {
    let default_timezone = "UTC";

    let raw_cfg: RawAppFile =
      toml::from_str(app_content)?;
    let raw_limits: RawRateLimitsFile = match rate_limits_content {
      | Some(c) => toml::from_str(c)?,
      | None => RawRateLimitsFile::default(),
    };

    let mode =
      parse_mode(raw_cfg.app.mode.as_deref())?;
    let tz_str = raw_cfg
      .app
      .timezone
      .as_deref()
      .filter(|s| !s.trim().is_empty())
      .unwrap_or(default_timezone);
    let timezone: Tz = tz_str
      .parse()
      .map_err(|_| ConfigError::Invalid(format!("invalid timezone '{tz_str}'")))?;

    let db_dialect =
      parse_dialect(raw_cfg.database.dialect.as_deref())?;
    let sqlite_path = if raw_cfg.sqlite.path.trim() == ":memory:" {
      PathBuf::from(":memory:")
    } else {
      resolve_relative(config_path, raw_cfg.sqlite.path.trim())
    };
    let postgres =
      parse_postgres(raw_cfg.postgres)?;

    let fetch = FetchSettings {
      user_agent: raw_cfg.fetch.user_agent,
      accept: raw_cfg.fetch.accept,
      timeout_ms: raw_cfg.fetch.timeout_ms,
      max_body_bytes: raw_cfg.fetch.max_body_bytes,
      max_concurrent_fetches: raw_cfg.fetch.max_concurrent_fetches,
      known_cdn_servers: raw_cfg
        .fetch
        .known_cdn_servers
        .into_iter()
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty())
        .collect(),
      proxy_url: non_empty(raw_cfg.fetch.proxy_url),
    };
    let retry = RetrySettings {
      base_wait_minutes: raw_cfg.retry.base_wait_minutes,
      max_fail_attempts: raw_cfg.retry.max_fail_attempts,
    };
    let dedup = DedupSettings {
      freshness_fraction: raw_cfg.dedup.freshness_fraction,
    };
    let ledger = LedgerSettings {
      retention_months: raw_cfg.ledger.retention_months,
      partition_lead_days: raw_cfg.ledger.partition_lead_days,
      response_retention_days: raw_cfg.ledger.response_retention_days,
      maintenance_interval_seconds: raw_cfg.ledger.maintenance_interval_seconds,
    };
    let response_store = ResponseStoreSettings {
      cache_ttl_seconds: raw_cfg.response_store.cache_ttl_seconds,
      always_durable: raw_cfg.response_store.always_durable,
      key_prefix: raw_cfg.response_store.key_prefix,
    };
    let broker = BrokerSettings {
      url: raw_cfg.broker.url,
      batch_queue: raw_cfg.broker.batch_queue,
      single_queue: raw_cfg.broker.single_queue,
      consumer_tag: raw_cfg.broker.consumer_tag,
      max_concurrent_batches: raw_cfg.broker.max_concurrent_batches,
    };
    let server = ServerSettings {
      host: raw_cfg.server.host,
      port: raw_cfg.server.port,
      api_key: non_empty(raw_cfg.server.api_key),
    };
    let metrics_cfg = raw_cfg.metrics.unwrap_or(RawMetrics {
      enabled: defaults::default_metrics_enabled(),
      bind: defaults::default_metrics_bind(),
    });

    let cfg = AppConfig {
      mode,
      timezone,
      db_dialect,
      sqlite_path,
      postgres,
      fetch,
      retry,
      dedup,
      ledger,
      response_store,
      cache: parse_cache(raw_cfg.cache)?,
      blob: parse_blob(raw_cfg.blob, config_path)?,
      broker,
      server,
      log_level: raw_cfg
        .logging
        .level
        .unwrap_or_else(|| "info".to_string()),
      log_batch_warn_seconds: raw_cfg.logging.batch_warn_seconds,
      metrics: MetricsConfig {
        enabled: metrics_cfg.enabled,
        bind: metrics_cfg.bind,
      },
      rate_limits: parse_rate_limits(raw_limits.hosts)?,
    };

    validate(&cfg)?;
    Ok(cfg)
  }
}

pub fn validate(
  cfg: &AppConfig
) -> Result<(), ConfigError> {
  let invalid =
    |msg: String| Err(ConfigError::Invalid(msg));

  if cfg.fetch.timeout_ms == 0 {
    return invalid("fetch.timeout_ms must be > 0".into());
  }
  if cfg.fetch.max_body_bytes == 0 {
    return invalid("fetch.max_body_bytes must be > 0".into());
  }
  if cfg.fetch.max_concurrent_fetches == 0 {
    return invalid("fetch.max_concurrent_fetches must be > 0".into());
  }
  if cfg.broker.max_concurrent_batches == 0 {
    return invalid("broker.max_concurrent_batches must be > 0".into());
  }
  if cfg.retry.base_wait_minutes == 0 || cfg.retry.max_fail_attempts == 0 {
    return invalid("retry.base_wait_minutes and retry.max_fail_attempts must be > 0".into());
  }
  if !(cfg.dedup.freshness_fraction > 0.0 && cfg.dedup.freshness_fraction <= 1.0) {
    return invalid(format!(
      "dedup.freshness_fraction must be in (0, 1], got {}",
      cfg.dedup.freshness_fraction
    ));
  }
  if cfg.ledger.retention_months == 0 {
    return invalid("ledger.retention_months must be > 0".into());
  }
  if cfg.response_store.cache_ttl_seconds == 0 {
    return invalid("response_store.cache_ttl_seconds must be > 0".into());
  }

  // Retention must outlive the widest
  // backoff window plus one partition,
  // or pruning could remove the OK
  // attempt a pending backoff is
  // anchored to.
  let retained_ms =
    i64::from(cfg.ledger.retention_months) * MIN_MONTH_MS;
  let needed_ms =
    longest_backoff_ms(&cfg.retry).saturating_add(MAX_MONTH_MS);
  if retained_ms <= needed_ms {
    return invalid(format!(
      "ledger.retention_months={} is too short for the longest backoff window ({:?}) plus one partition",
      cfg.ledger.retention_months,
      Duration::from_millis(longest_backoff_ms(&cfg.retry) as u64)
    ));
  }

  Ok(())
}
