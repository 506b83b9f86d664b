//! Synchronous inspection and manual
//! fetches for the query API. Manual
//! attempts bypass guard, policy and
//! gate, and never emit events.
use thiserror::Error;
use tracing::{
  debug,
  info
};

use crate::app::context::AppContext;
use crate::app::fetch::execute_fetch;
use crate::app::ledger::PendingInserts;
use crate::domain::model::{
  AttemptFilter,
  AttemptSource,
  AttemptStatus,
  FetchAttempt,
  HostRateLimit
};
use crate::error::StoreError;
use crate::infra::response_store::Retrieved;
use crate::ports::clock::Clock;
use crate::ports::http::Http;
use crate::ports::ledger::Ledger;

pub const DEFAULT_LIST_LIMIT: u32 = 25;
pub const MAX_LIST_LIMIT: u32 = 100;
pub const DEFAULT_STALENESS_SECONDS: u64 = 1800;

#[derive(Debug, Error)]
pub enum QueryError {
  #[error("either url or lookupKey is required")]
  MissingTarget,
  #[error(transparent)]
  Store(#[from] StoreError),
}

#[derive(Debug, Clone, Default)]
pub struct ListQuery {
  pub url: Option<String>,
  pub lookup_key: Option<String>,
  pub limit: Option<u32>,
  pub skip: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct RequestListing {
  pub requests: Vec<FetchAttempt>,
  /// Set when the newest listed attempt
  /// is a failure.
  pub next_retry_at_ms: Option<i64>,
  pub rate_limit: Option<HostRateLimit>,
}

pub async fn list_requests<L, H, C>(
  ctx: &AppContext<L, H, C>,
  query: &ListQuery
) -> Result<RequestListing, QueryError>
where
  L: Ledger + ?Sized,
  H: Http + ?Sized,
  C: Clock + ?Sized,
{
  let filter = match (&query.lookup_key, &query.url) {
    | (Some(key), _) if !key.is_empty() => AttemptFilter::LookupKey(key.clone()),
    | (_, Some(url)) if !url.is_empty() => AttemptFilter::Url(url.clone()),
    | _ => return Err(QueryError::MissingTarget),
  };
  let limit =
    query.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);
  let skip = query.skip.unwrap_or(0);

  let requests =
    ctx.ledger.list_recent(&filter, limit, skip).await?;

  let next_retry_at_ms = match requests.first() {
    | Some(newest) if !newest.status.is_ok() => ctx.ledger.latest_next_retry_at(&newest.lookup_key).await?,
    | _ => None,
  };

  let rate_limit = query
    .url
    .as_deref()
    .or_else(|| requests.first().map(|a| a.url.as_str()))
    .and_then(|url| ctx.gate.limit_for_url(url))
    .cloned();

  Ok(RequestListing {
    requests,
    next_retry_at_ms,
    rate_limit,
  })
}

#[derive(Debug, Clone)]
pub struct FetchRequest {
  pub url: String,
  pub lookup_key: Option<String>,
  pub execute_fetch: bool,
  pub execute_fetch_if_not_exists: bool,
  pub execute_fetch_if_stale: bool,
  pub staleness_threshold_seconds: u64,
  pub hash_to_compare: Option<String>,
  pub save_to_object_storage: bool,
  /// Sent with manual fetches only.
  pub headers: Vec<(String, String)>,
}

impl FetchRequest {
  pub fn new(
    url: impl Into<String>
  ) -> Self {
    Self {
      url: url.into(),
      lookup_key: None,
      execute_fetch: false,
      execute_fetch_if_not_exists: true,
      execute_fetch_if_stale: false,
      staleness_threshold_seconds: DEFAULT_STALENESS_SECONDS,
      hash_to_compare: None,
      save_to_object_storage: false,
      headers: Vec::new(),
    }
  }

  pub fn lookup_key(&self) -> &str {
    match self.lookup_key.as_deref() {
      | Some(k) if !k.is_empty() => k,
      | _ => &self.url,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchStatusView {
  Success {
    /// `None` when the attempt kept no
    /// response metadata (a 304, or a
    /// body no tier accepted).
    hash: Option<String>,
    body: String,
    status_code: Option<u16>,
  },
  BadStatusCode {
    status_code: Option<u16>,
  },
  ParseError {
    status_code: Option<u16>,
  },
  FetchError,
  FetchTimeout,
  RefusedOversized,
  /// Nothing recorded yet and fetching
  /// was not allowed.
  Pending,
}

impl FetchStatusView {
  pub fn request_status(
    &self
  ) -> &'static str {
    match self {
      | FetchStatusView::Success { .. } => "SUCCESS",
      | FetchStatusView::BadStatusCode { .. } => "BAD_STATUS_CODE",
      | FetchStatusView::ParseError { .. } => "PARSE_ERROR",
      | FetchStatusView::FetchError => "FETCH_ERROR",
      | FetchStatusView::FetchTimeout => "FETCH_TIMEOUT",
      | FetchStatusView::RefusedOversized => "REFUSED_LARGE_FEED",
      | FetchStatusView::Pending => "PENDING",
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OnDemandResult {
  MatchedHash,
  Status(FetchStatusView),
}

impl OnDemandResult {
  pub fn request_status(
    &self
  ) -> &'static str {
    match self {
      | OnDemandResult::MatchedHash => "MATCHED_HASH",
      | OnDemandResult::Status(view) => view.request_status(),
    }
  }
}

pub async fn fetch_on_demand<L, H, C>(
  ctx: &AppContext<L, H, C>,
  req: &FetchRequest
) -> Result<OnDemandResult, StoreError>
where
  L: Ledger + ?Sized,
  H: Http + ?Sized,
  C: Clock + ?Sized,
{
  let lookup_key = req.lookup_key();

  if req.execute_fetch {
    fetch_and_flush(ctx, req).await?;
  }

  let mut latest =
    ctx.ledger.latest_attempt(lookup_key).await?;

  if req.execute_fetch_if_stale
    && let Some(attempt) = &latest
    && is_stale(ctx, attempt, req.staleness_threshold_seconds).await
  {
    debug!(url = %req.url, lookup_key, "Latest attempt is stale, refetching");
    fetch_and_flush(ctx, req).await?;
    latest = ctx.ledger.latest_attempt(lookup_key).await?;
  }

  if latest.is_none() && req.execute_fetch_if_not_exists {
    latest = Some(fetch_and_flush(ctx, req).await?);
  }

  let Some(attempt) = latest else {
    return Ok(OnDemandResult::Status(FetchStatusView::Pending));
  };

  if let (Some(expected), Some(response)) = (req.hash_to_compare.as_deref(), attempt.response.as_ref())
    && !expected.is_empty()
    && expected == response.text_hash
  {
    return Ok(OnDemandResult::MatchedHash);
  }

  Ok(OnDemandResult::Status(status_view(ctx, &attempt).await))
}

/// Status as a delivery would see it:
/// refetches when nothing is recorded
/// or the newest attempt is older than
/// the threshold. Never answers
/// `Pending`.
pub async fn delivery_preview<L, H, C>(
  ctx: &AppContext<L, H, C>,
  req: &FetchRequest
) -> Result<FetchStatusView, StoreError>
where
  L: Ledger + ?Sized,
  H: Http + ?Sized,
  C: Clock + ?Sized,
{
  let lookup_key = req.lookup_key();
  let mut latest =
    ctx.ledger.latest_attempt(lookup_key).await?;

  let stale = match &latest {
    | Some(attempt) => is_stale(ctx, attempt, req.staleness_threshold_seconds).await,
    | None => true,
  };
  if stale {
    debug!(url = %req.url, lookup_key, "Refreshing for delivery preview");
    fetch_and_flush(ctx, req).await?;
    latest = ctx.ledger.latest_attempt(lookup_key).await?;
  }

  Ok(match latest {
    | Some(attempt) => status_view(ctx, &attempt).await,
    | None => FetchStatusView::FetchError,
  })
}

async fn is_stale<L, H, C>(
  ctx: &AppContext<L, H, C>,
  attempt: &FetchAttempt,
  threshold_seconds: u64
) -> bool
where
  L: Ledger + ?Sized,
  H: Http + ?Sized,
  C: Clock + ?Sized,
{
  let now_ms =
    ctx.clock.now_epoch_ms().await;
  let age_ms =
    now_ms.saturating_sub(attempt.created_at_ms);
  let threshold_ms =
    i64::try_from(threshold_seconds.saturating_mul(1000)).unwrap_or(i64::MAX);
  age_ms > threshold_ms
}

async fn fetch_and_flush<L, H, C>(
  ctx: &AppContext<L, H, C>,
  req: &FetchRequest
) -> Result<FetchAttempt, StoreError>
where
  L: Ledger + ?Sized,
  H: Http + ?Sized,
  C: Clock + ?Sized,
{
  let durable =
    ctx.cfg.response_store.always_durable || req.save_to_object_storage;
  let attempt =
    execute_fetch(ctx, &req.url, req.lookup_key(), &req.headers, AttemptSource::Manual, durable).await;
  info!(
    url = %attempt.url,
    lookup_key = %attempt.lookup_key,
    status = attempt.status.as_str(),
    "Manual fetch finished"
  );

  let pending = PendingInserts::new();
  pending.mark_for_persistence(attempt.clone());
  pending.flush(ctx.ledger.as_ref()).await?;
  Ok(attempt)
}

async fn status_view<L, H, C>(
  ctx: &AppContext<L, H, C>,
  attempt: &FetchAttempt
) -> FetchStatusView
where
  L: Ledger + ?Sized,
  H: Http + ?Sized,
  C: Clock + ?Sized,
{
  let status_code = attempt
    .response
    .as_ref()
    .map(|r| r.status_code)
    .or(attempt.http_status);

  match attempt.status {
    | AttemptStatus::Ok => {
      let (hash, body) = match &attempt.response {
        | Some(r) => {
          let body = match ctx.responses.retrieve(&r.location).await {
            | Retrieved::Text(t) => t,
            | Retrieved::Empty => String::new(),
          };
          (Some(r.text_hash.clone()), body)
        }
        | None => (None, String::new()),
      };
      FetchStatusView::Success {
        hash,
        body,
        status_code,
      }
    }
    | AttemptStatus::BadStatusCode => FetchStatusView::BadStatusCode { status_code },
    | AttemptStatus::ParseError => FetchStatusView::ParseError { status_code },
    | AttemptStatus::FetchError => FetchStatusView::FetchError,
    | AttemptStatus::FetchTimeout => FetchStatusView::FetchTimeout,
    | AttemptStatus::RefusedOversized => FetchStatusView::RefusedOversized,
  }
}
