use std::collections::HashSet;
use std::path::Path;

use super::ConfigError;
use super::paths::resolve_relative;
use super::raw::{
  RawBlob,
  RawCache,
  RawHostLimit,
  RawPostgres
};
use crate::domain::model::{
  AppMode,
  BlobBackend,
  CacheBackend,
  HostRateLimit,
  PostgresConfig,
  SqlDialect
};

pub(crate) fn parse_dialect(
  s: Option<&str>
) -> Result<SqlDialect, ConfigError> {
  match s.map(|x| x.trim().to_ascii_lowercase()) {
    | None => Ok(SqlDialect::Sqlite),
    | Some(d) if d == "sqlite" => Ok(SqlDialect::Sqlite),
    | Some(d) if d == "postgres" => Ok(SqlDialect::Postgres),
    | Some(other) => Err(ConfigError::Invalid(format!(
      "invalid database.dialect '{other}', expected 'sqlite' or 'postgres'"
    ))),
  }
}

pub(crate) fn parse_mode(
  s: Option<&str>
) -> Result<AppMode, ConfigError> {
  match s.map(|x| x.trim().to_ascii_lowercase()) {
    | None => Ok(AppMode::Prod),
    | Some(m) if m == "prod" => Ok(AppMode::Prod),
    | Some(m) if m == "dev" => Ok(AppMode::Dev),
    | Some(other) => Err(ConfigError::Invalid(format!(
      "invalid app.mode '{other}', expected 'dev' or 'prod'"
    ))),
  }
}

pub(crate) fn parse_postgres(
  raw: Option<RawPostgres>
) -> Result<PostgresConfig, ConfigError> {
  let pg = raw.unwrap_or_default();
  let schema = pg.schema.trim();
  if schema.is_empty() {
    return Err(ConfigError::Invalid("postgres schema cannot be empty".into()));
  }
  if !schema.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
    return Err(ConfigError::Invalid(format!(
      "invalid postgres schema '{schema}': only alphanumeric and '_' allowed"
    )));
  }
  Ok(PostgresConfig {
    user: pg.user,
    password: pg.password,
    host: pg.host,
    port: pg.port,
    database: pg.db,
    schema: schema.to_string(),
  })
}

pub(crate) fn parse_cache(
  raw: RawCache
) -> Result<CacheBackend, ConfigError> {
  match raw.backend.as_deref().map(|b| b.trim().to_ascii_lowercase()) {
    | None => Ok(CacheBackend::Memory),
    | Some(b) if b == "memory" => Ok(CacheBackend::Memory),
    | Some(b) if b == "redis" => {
      let url = non_empty(raw.redis_url)
        .ok_or_else(|| ConfigError::Invalid("cache.redis_url is required for the redis backend".into()))?;
      Ok(CacheBackend::Redis { url })
    }
    | Some(other) => Err(ConfigError::Invalid(format!(
      "invalid cache.backend '{other}', expected 'memory' or 'redis'"
    ))),
  }
}

pub(crate) fn parse_blob(
  raw: RawBlob,
  config_path: &Path
) -> Result<BlobBackend, ConfigError> {
  match raw.backend.as_deref().map(|b| b.trim().to_ascii_lowercase()) {
    | None => Ok(BlobBackend::Memory),
    | Some(b) if b == "memory" => Ok(BlobBackend::Memory),
    | Some(b) if b == "disabled" || b == "none" => Ok(BlobBackend::Disabled),
    | Some(b) if b == "fs" => {
      let root =
        non_empty(raw.fs_root).unwrap_or_else(|| "responses".to_string());
      Ok(BlobBackend::Filesystem {
        root: resolve_relative(config_path, &root),
      })
    }
    | Some(b) if b == "s3" => {
      let bucket = non_empty(raw.s3_bucket)
        .ok_or_else(|| ConfigError::Invalid("blob.s3_bucket is required for the s3 backend".into()))?;
      Ok(BlobBackend::S3 {
        bucket,
        region: non_empty(raw.s3_region).unwrap_or_else(|| "us-east-1".to_string()),
        endpoint: non_empty(raw.s3_endpoint),
        access_key_id: non_empty(raw.s3_access_key_id),
        secret_access_key: non_empty(raw.s3_secret_access_key),
        prefix: non_empty(raw.s3_prefix),
      })
    }
    | Some(other) => Err(ConfigError::Invalid(format!(
      "invalid blob.backend '{other}', expected 'memory', 'fs', 's3' or 'disabled'"
    ))),
  }
}

pub(crate) fn parse_rate_limits(
  raw: Vec<RawHostLimit>
) -> Result<Vec<HostRateLimit>, ConfigError> {
  let mut seen = HashSet::new();
  let mut out =
    Vec::with_capacity(raw.len());
  for entry in raw {
    let host =
      entry.host.trim().to_ascii_lowercase();
    if host.is_empty() {
      return Err(ConfigError::Invalid("rate limit host cannot be empty".into()));
    }
    if entry.request_limit == 0 || entry.interval_seconds == 0 {
      return Err(ConfigError::Invalid(format!(
        "rate limit for '{host}' needs request_limit and interval_seconds > 0"
      )));
    }
    if !seen.insert(host.clone()) {
      return Err(ConfigError::Invalid(format!("duplicate rate limit host '{host}'")));
    }
    out.push(HostRateLimit {
      host,
      request_limit: entry.request_limit,
      interval_seconds: entry.interval_seconds,
    });
  }
  Ok(out)
}

pub(crate) fn non_empty(
  raw: Option<String>
) -> Option<String> {
  raw.and_then(|s| {
    let trimmed = s.trim();
    if trimmed.is_empty() {
      None
    } else {
      Some(trimmed.to_string())
    }
  })
}

/// Lowercased host of an absolute URL,
/// without userinfo or port.
pub fn url_host(
  url: &str
) -> Option<String> {
  let after_scheme = url.trim().split("://").nth(1)?;
  let authority =
    after_scheme.split(['/', '?', '#']).next()?;
  let host_port =
    authority.rsplit('@').next().unwrap_or(authority);
  let host = if let Some(rest) = host_port.strip_prefix('[') {
    rest.split(']').next().unwrap_or(rest)
  } else {
    host_port.split(':').next().unwrap_or(host_port)
  };

  if host.is_empty() {
    None
  } else {
    Some(host.to_ascii_lowercase())
  }
}
