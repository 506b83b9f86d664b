//! Builds the storage adapters named in
//! the config.
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::domain::model::{
  AppConfig,
  BlobBackend,
  CacheBackend
};
use crate::error::StoreError;
use crate::infra::fs_blob::FsBlobStore;
use crate::infra::memory::{
  MemoryBlobStore,
  MemoryCacheStore,
  MemoryCounterStore
};
use crate::infra::rate_limit::RateLimitGate;
use crate::infra::redis_store::RedisStore;
use crate::infra::response_store::ResponseTierStore;
use crate::infra::s3_blob::{
  S3BlobStore,
  S3Options
};
use crate::ports::blob_store::BlobStore;
use crate::ports::cache_store::CacheStore;
use crate::ports::counter_store::CounterStore;

pub struct Adapters {
  pub gate: Arc<RateLimitGate>,
  pub responses: Arc<ResponseTierStore>,
}

pub async fn build_adapters(
  cfg: &AppConfig
) -> Result<Adapters, StoreError> {
  let (counter, cache): (Arc<dyn CounterStore>, Arc<dyn CacheStore>) = match &cfg.cache {
    | CacheBackend::Memory => (Arc::new(MemoryCounterStore::new()), Arc::new(MemoryCacheStore::new())),
    | CacheBackend::Redis { url } => {
      let store =
        RedisStore::connect(url, &cfg.response_store.key_prefix).await?;
      info!("Counter and cache stores on redis");
      (Arc::new(store.clone()), Arc::new(store))
    }
  };

  let blob =
    build_blob_store(&cfg.blob).await?;

  Ok(Adapters {
    gate: Arc::new(RateLimitGate::new(counter, &cfg.rate_limits)),
    responses: Arc::new(ResponseTierStore::new(
      cache,
      blob,
      Duration::from_secs(cfg.response_store.cache_ttl_seconds),
    )),
  })
}

pub async fn build_blob_store(
  backend: &BlobBackend
) -> Result<Option<Arc<dyn BlobStore>>, StoreError> {
  let store: Arc<dyn BlobStore> = match backend {
    | BlobBackend::Disabled => {
      info!("Blob tier disabled; responses are cache-only");
      return Ok(None);
    }
    | BlobBackend::Memory => Arc::new(MemoryBlobStore::new()),
    | BlobBackend::Filesystem { root } => {
      info!(root = %root.display(), "Blob tier on local filesystem");
      Arc::new(FsBlobStore::new(root).await?)
    }
    | BlobBackend::S3 {
      bucket,
      region,
      endpoint,
      access_key_id,
      secret_access_key,
      prefix,
    } => {
      info!(bucket = %bucket, region = %region, "Blob tier on S3");
      Arc::new(
        S3BlobStore::new(S3Options {
          bucket,
          region,
          endpoint: endpoint.as_deref(),
          access_key_id: access_key_id.as_deref(),
          secret_access_key: secret_access_key.as_deref(),
          prefix: prefix.as_deref(),
        })
        .await,
      )
    }
  };
  Ok(Some(store))
}
