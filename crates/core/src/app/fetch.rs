//! Performs one GET and turns the
//! result into a ledger attempt.
use tracing::debug;
use uuid::Uuid;

use crate::app::context::AppContext;
use crate::domain::hashing::text_hash;
use crate::domain::model::{
  AttemptSource,
  FetchAttempt,
  FetchResult,
  StoredResponse
};
use crate::infra::metrics;
use crate::ports::clock::Clock;
use crate::ports::http::Http;
use crate::ports::ledger::Ledger;

/// Whether the `server` header names
/// one of the configured CDNs.
pub fn is_known_cdn(
  server: Option<&str>,
  fingerprints: &[String]
) -> bool {
  let Some(server) = server else {
    return false;
  };
  let server =
    server.to_ascii_lowercase();
  fingerprints.iter().any(|f| !f.is_empty() && server.contains(f.as_str()))
}

/// Fetches `url` and stores any body in
/// the response tiers. The returned
/// attempt has no retry time; scheduled
/// callers add it before buffering.
pub async fn execute_fetch<L, H, C>(
  ctx: &AppContext<L, H, C>,
  url: &str,
  lookup_key: &str,
  headers: &[(String, String)],
  source: AttemptSource,
  durable: bool,
) -> FetchAttempt
where
  L: Ledger + ?Sized,
  H: Http + ?Sized,
  C: Clock + ?Sized,
{
  let result = {
    let _inflight =
      metrics::record_inflight_start();
    ctx.http.fetch_with_headers(url, headers).await
  };
  let created_at_ms =
    ctx.clock.now_epoch_ms().await;
  let status = result.attempt_status();

  metrics::record_attempt(status.as_str(), result.latency_ms);
  debug!(
    url,
    lookup_key,
    status = status.as_str(),
    status_code = result.status_code,
    latency_ms = result.latency_ms,
    source = source.as_str(),
    "Fetch finished"
  );

  let response =
    store_response(ctx, url, &result, durable, created_at_ms).await;

  FetchAttempt {
    id: Uuid::new_v4().to_string(),
    url: url.to_string(),
    lookup_key: lookup_key.to_string(),
    status,
    source,
    created_at_ms,
    next_retry_at_ms: None,
    error_message: result.error_message,
    http_status: result.status_code,
    response,
  }
}

async fn store_response<L, H, C>(
  ctx: &AppContext<L, H, C>,
  url: &str,
  result: &FetchResult,
  durable: bool,
  created_at_ms: i64,
) -> Option<StoredResponse>
where
  L: Ledger + ?Sized,
  H: Http + ?Sized,
  C: Clock + ?Sized,
{
  let status_code = result.status_code?;
  let body = result.body.as_deref()?;

  let location =
    ctx.responses.store(url, body, durable).await?;

  Some(StoredResponse {
    id: Uuid::new_v4().to_string(),
    status_code,
    text_hash: text_hash(body),
    is_from_known_cdn: is_known_cdn(result.server.as_deref(), &ctx.cfg.fetch.known_cdn_servers),
    etag: result.etag.clone(),
    last_modified: result.last_modified.clone(),
    location,
    created_at_ms,
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn cdn_match_is_case_insensitive_substring() {
    let cdns =
      vec!["cloudflare".to_string()];
    assert!(is_known_cdn(Some("Cloudflare"), &cdns));
    assert!(is_known_cdn(Some("cloudflare-nginx"), &cdns));
    assert!(!is_known_cdn(Some("nginx"), &cdns));
    assert!(!is_known_cdn(None, &cdns));
  }
}
