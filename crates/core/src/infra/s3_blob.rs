//! S3-compatible durable tier for
//! response bodies.
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;

use crate::error::StoreError;
use crate::ports::blob_store::BlobStore;

#[derive(Clone)]
pub struct S3BlobStore {
  client: Client,
  bucket: String,
  prefix: Option<String>,
}

pub struct S3Options<'a> {
  pub bucket: &'a str,
  pub region: &'a str,
  pub endpoint: Option<&'a str>,
  pub access_key_id: Option<&'a str>,
  pub secret_access_key: Option<&'a str>,
  pub prefix: Option<&'a str>,
}

impl S3BlobStore {
  #[tracing::instrument(level = "debug", skip(opts), fields(bucket = opts.bucket))]
  pub async fn new(
    opts: S3Options<'_>
  ) -> Self {
    let mut loader =
      aws_config::defaults(BehaviorVersion::latest()).region(Region::new(opts.region.to_string()));

    // Static keys win over the default
    // provider chain when both are set.
    if let (Some(key_id), Some(secret)) = (opts.access_key_id, opts.secret_access_key) {
      loader = loader.credentials_provider(Credentials::new(
        key_id,
        secret,
        None,
        None,
        "feedgate_static",
      ));
    }
    if let Some(endpoint) = opts.endpoint {
      loader = loader.endpoint_url(endpoint);
    }

    let shared = loader.load().await;
    let s3_cfg = aws_sdk_s3::config::Builder::from(&shared)
      .force_path_style(opts.endpoint.is_some())
      .build();

    Self {
      client: Client::from_conf(s3_cfg),
      bucket: opts.bucket.to_string(),
      prefix: opts
        .prefix
        .map(|p| p.trim().trim_matches('/').to_string())
        .filter(|p| !p.is_empty()),
    }
  }

  fn object_key(
    &self,
    key: &str
  ) -> String {
    match &self.prefix {
      | Some(p) => format!("{p}/{key}"),
      | None => key.to_string(),
    }
  }
}

#[async_trait::async_trait]
impl BlobStore for S3BlobStore {
  #[tracing::instrument(level = "debug", skip(self, data))]
  async fn put(
    &self,
    key: &str,
    data: Bytes
  ) -> Result<(), StoreError> {
    self.client
      .put_object()
      .bucket(&self.bucket)
      .key(self.object_key(key))
      .body(ByteStream::from(data))
      .send()
      .await
      .map_err(|e| StoreError::backend("s3 put_object", e))?;
    Ok(())
  }

  #[tracing::instrument(level = "debug", skip(self))]
  async fn get(
    &self,
    key: &str
  ) -> Result<Option<Bytes>, StoreError> {
    let resp = self
      .client
      .get_object()
      .bucket(&self.bucket)
      .key(self.object_key(key))
      .send()
      .await;

    let resp = match resp {
      | Ok(r) => r,
      | Err(e) => {
        if e
          .as_service_error()
          .map(|se| se.is_no_such_key())
          .unwrap_or(false)
        {
          return Ok(None);
        }
        return Err(StoreError::backend("s3 get_object", e));
      }
    };

    let data = resp
      .body
      .collect()
      .await
      .map_err(|e| StoreError::backend("s3 collect body", e))?
      .into_bytes();
    Ok(Some(data))
  }
}
