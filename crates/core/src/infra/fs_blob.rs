//! Directory-backed blob store for
//! single-host deployments.
use std::io::ErrorKind;
use std::path::{
  Path,
  PathBuf
};

use bytes::Bytes;
use tokio::fs;

use crate::error::StoreError;
use crate::ports::blob_store::BlobStore;

pub struct FsBlobStore {
  root: PathBuf,
}

impl FsBlobStore {
  pub async fn new(
    root: &Path
  ) -> Result<Self, StoreError> {
    fs::create_dir_all(root)
      .await
      .map_err(|e| StoreError::backend("blob dir create", e))?;
    Ok(Self {
      root: root.to_path_buf(),
    })
  }

  fn path_for(
    &self,
    key: &str
  ) -> Result<PathBuf, StoreError> {
    if key.is_empty() || key.contains(['/', '\\']) || key.starts_with('.') {
      return Err(StoreError::backend("blob key", format!("invalid key '{key}'")));
    }
    // Two-character fan-out keeps
    // directories small.
    let shard: String =
      key.chars().take(2).collect();
    Ok(self.root.join(shard).join(key))
  }
}

#[async_trait::async_trait]
impl BlobStore for FsBlobStore {
  async fn put(
    &self,
    key: &str,
    data: Bytes
  ) -> Result<(), StoreError> {
    let path = self.path_for(key)?;
    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent)
        .await
        .map_err(|e| StoreError::backend("blob shard create", e))?;
    }
    let tmp =
      path.with_extension("tmp");
    fs::write(&tmp, &data)
      .await
      .map_err(|e| StoreError::backend("blob write", e))?;
    fs::rename(&tmp, &path)
      .await
      .map_err(|e| StoreError::backend("blob rename", e))?;
    Ok(())
  }

  async fn get(
    &self,
    key: &str
  ) -> Result<Option<Bytes>, StoreError> {
    let path = self.path_for(key)?;
    match fs::read(&path).await {
      | Ok(data) => Ok(Some(Bytes::from(data))),
      | Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
      | Err(e) => Err(StoreError::backend("blob read", e)),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn writes_and_reads_back() {
    let dir =
      tempfile::tempdir().unwrap();
    let store =
      FsBlobStore::new(dir.path()).await.unwrap();
    assert!(store.get("abc").await.unwrap().is_none());
    store.put("abc", Bytes::from_static(b"body")).await.unwrap();
    assert_eq!(store.get("abc").await.unwrap(), Some(Bytes::from_static(b"body")));
  }

  #[tokio::test]
  async fn rejects_path_traversal() {
    let dir =
      tempfile::tempdir().unwrap();
    let store =
      FsBlobStore::new(dir.path()).await.unwrap();
    assert!(store.put("../x", Bytes::new()).await.is_err());
  }
}
