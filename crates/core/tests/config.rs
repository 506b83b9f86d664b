use std::path::PathBuf;

use feedgate_core::domain::model::{
  AppMode,
  BlobBackend,
  CacheBackend,
  SqlDialect
};
use feedgate_core::infra::config::{
  ConfigError,
  ConfigLoader
};

fn bundled_config() -> PathBuf {
  PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../fetcher/res/config.toml")
}

#[tokio::test]
async fn bundled_config_loads_with_sibling_rate_limits() {
  let path = bundled_config();
  let cfg =
    ConfigLoader::load(&path).await.unwrap();
  let res_dir =
    path.parent().unwrap().to_path_buf();

  assert_eq!(cfg.mode, AppMode::Prod);
  assert_eq!(cfg.db_dialect, SqlDialect::Sqlite);
  assert_eq!(cfg.sqlite_path, res_dir.join("feedgate.db"));
  assert_eq!(cfg.cache, CacheBackend::Memory);
  assert_eq!(
    cfg.blob,
    BlobBackend::Filesystem {
      root: res_dir.join("responses")
    }
  );
  assert!(cfg.server.api_key.is_none());

  assert_eq!(cfg.rate_limits.len(), 1);
  assert_eq!(cfg.rate_limits[0].host, "data.sec.gov");
  assert_eq!(cfg.rate_limits[0].request_limit, 10);
  assert_eq!(cfg.rate_limits[0].interval_seconds, 2);
}

#[tokio::test]
async fn missing_rate_limits_file_means_no_throttling() {
  let dir =
    tempfile::tempdir().unwrap();
  let path =
    dir.path().join("config.toml");
  tokio::fs::write(&path, "[app]\nmode = \"dev\"\n").await.unwrap();

  let cfg =
    ConfigLoader::load(&path).await.unwrap();

  assert_eq!(cfg.mode, AppMode::Dev);
  assert!(cfg.rate_limits.is_empty());
}

#[tokio::test]
async fn missing_config_file_is_an_io_error() {
  let dir =
    tempfile::tempdir().unwrap();
  let err =
    ConfigLoader::load(&dir.path().join("absent.toml")).await.unwrap_err();
  assert!(matches!(err, ConfigError::Io(_)));
}
