//! Response tiering: compressed bodies
//! go to a short-lived cache and, when
//! durable storage is requested, to the
//! blob store as well.
use std::io::{
  Read,
  Write
};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use tracing::{
  debug,
  warn
};
use uuid::Uuid;

use crate::domain::hashing::sha256_hex;
use crate::domain::model::ResponseLocation;
use crate::ports::blob_store::BlobStore;
use crate::ports::cache_store::CacheStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Retrieved {
  Text(String),
  /// Evicted, expired, never stored, or
  /// unreadable.
  Empty,
}

impl Retrieved {
  pub fn into_text(
    self
  ) -> Option<String> {
    match self {
      | Retrieved::Text(t) => Some(t),
      | Retrieved::Empty => None,
    }
  }
}

pub fn compress(
  text: &str
) -> std::io::Result<Vec<u8>> {
  let mut encoder =
    ZlibEncoder::new(Vec::new(), Compression::default());
  encoder.write_all(text.as_bytes())?;
  encoder.finish()
}

pub fn decompress(
  data: &[u8]
) -> std::io::Result<String> {
  let mut out = String::new();
  ZlibDecoder::new(data).read_to_string(&mut out)?;
  Ok(out)
}

pub fn cache_key_for(
  url: &str
) -> String {
  format!("response:{}", sha256_hex(url.as_bytes()))
}

pub struct ResponseTierStore {
  cache: Arc<dyn CacheStore>,
  blob: Option<Arc<dyn BlobStore>>,
  cache_ttl: Duration,
}

impl ResponseTierStore {
  pub fn new(
    cache: Arc<dyn CacheStore>,
    blob: Option<Arc<dyn BlobStore>>,
    cache_ttl: Duration
  ) -> Self {
    Self {
      cache,
      blob,
      cache_ttl,
    }
  }

  pub fn has_durable_tier(
    &self
  ) -> bool {
    self.blob.is_some()
  }

  /// Stores `text` and returns where it
  /// can be read back. Storage failures
  /// are logged; `None` means no tier
  /// accepted the body.
  pub async fn store(
    &self,
    url: &str,
    text: &str,
    durable: bool
  ) -> Option<ResponseLocation> {
    let compressed = match compress(text) {
      | Ok(c) => c,
      | Err(e) => {
        warn!(url, error = %e, "Failed to compress response body");
        return None;
      }
    };

    let cache_key = cache_key_for(url);
    let cached = match self
      .cache
      .set_with_ttl(&cache_key, compressed.clone(), self.cache_ttl)
      .await
    {
      | Ok(()) => true,
      | Err(e) => {
        warn!(url, error = %e, "Failed to write response to cache tier");
        false
      }
    };

    if durable && let Some(blob) = &self.blob {
      let blob_key =
        Uuid::new_v4().to_string();
      match blob.put(&blob_key, Bytes::from(compressed)).await {
        | Ok(()) => {
          debug!(url, blob_key = %blob_key, "Response stored in blob tier");
          return Some(ResponseLocation::Blob { key: blob_key });
        }
        | Err(e) => {
          warn!(url, error = %e, "Failed to write response to blob tier");
        }
      }
    }

    cached.then_some(ResponseLocation::Cache { key: cache_key })
  }

  pub async fn retrieve(
    &self,
    location: &ResponseLocation
  ) -> Retrieved {
    let raw = match location {
      | ResponseLocation::Blob { key } => match &self.blob {
        | Some(blob) => blob.get(key).await.map(|b| b.map(|b| b.to_vec())),
        | None => {
          warn!(key = %key, "Blob location recorded but no blob tier configured");
          return Retrieved::Empty;
        }
      },
      | ResponseLocation::Cache { key } => self.cache.get(key).await,
    };

    let data = match raw {
      | Ok(Some(d)) => d,
      | Ok(None) => return Retrieved::Empty,
      | Err(e) => {
        warn!(tier = location.tier(), key = location.key(), error = %e, "Response read failed");
        return Retrieved::Empty;
      }
    };

    match decompress(&data) {
      | Ok(text) => Retrieved::Text(text),
      | Err(e) => {
        warn!(tier = location.tier(), key = location.key(), error = %e, "Response decompress failed");
        Retrieved::Empty
      }
    }
  }
}
