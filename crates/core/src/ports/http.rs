//! HTTP collaborator: one GET per call,
//! errors folded into the result.
use crate::domain::model::FetchResult;

#[async_trait::async_trait]
pub trait Http: Send + Sync {
  /// Never fails: transport problems
  /// come back as a classified status.
  async fn fetch(
    &self,
    url: &str
  ) -> FetchResult;

  /// Same as `fetch` with extra request
  /// headers. Adapters that cannot send
  /// headers ignore them.
  async fn fetch_with_headers(
    &self,
    url: &str,
    headers: &[(String, String)]
  ) -> FetchResult {
    let _ = headers;
    self.fetch(url).await
  }
}
