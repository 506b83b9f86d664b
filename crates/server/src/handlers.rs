use std::collections::BTreeMap;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router, middleware};
use tracing::debug;

use feedgate_core::app::on_demand::{
    FetchRequest, FetchStatusView, ListQuery, OnDemandResult, RequestListing, delivery_preview, fetch_on_demand,
    list_requests,
};
use feedgate_core::domain::model::FetchAttempt;
use feedgate_core::infra::time::epoch_ms_to_utc_iso;

use crate::app_state::AppState;
use crate::auth::require_api_key;
use crate::errors::ServerError;
use crate::models::{
    DeliveryPreviewRequest, FeedRequestSummary, FeedRequestsQuery, FeedRequestsResponse, FeedRequestsResult,
    FetchFeedRequest, FetchFeedResponse, FetchedResponse, HostRateLimitView, ResponseSummary,
};

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/v1/feed-requests", get(list_feed_requests).post(fetch_feed))
        .route("/v1/feed-requests/delivery-preview", post(preview_delivery))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_api_key));

    Router::new()
        .route("/health", get(health))
        .merge(api)
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn list_feed_requests(
    State(state): State<AppState>,
    Query(q): Query<FeedRequestsQuery>,
) -> Result<Json<FeedRequestsResponse>, ServerError> {
    let query = ListQuery {
        url: q.url,
        lookup_key: q.lookup_key,
        limit: q.limit,
        skip: q.skip,
    };
    let listing = list_requests(&state.ctx, &query).await?;
    debug!(returned = listing.requests.len(), "Listed feed requests");
    Ok(Json(listing_to_response(listing)))
}

async fn fetch_feed(
    State(state): State<AppState>,
    Json(body): Json<FetchFeedRequest>,
) -> Result<Json<FetchFeedResponse>, ServerError> {
    let mut req = FetchRequest::new(required_url(&body.url)?);
    req.headers = body.lookup_details.header_pairs();
    req.lookup_key = body.lookup_key.or(body.lookup_details.key);
    req.execute_fetch = body.execute_fetch;
    req.execute_fetch_if_stale = body.execute_fetch_if_stale;
    req.hash_to_compare = body.hash_to_compare;
    req.save_to_object_storage = body.save_to_object_storage;
    if let Some(v) = body.execute_fetch_if_not_exists {
        req.execute_fetch_if_not_exists = v;
    }
    if let Some(v) = body.staleness_threshold_seconds {
        req.staleness_threshold_seconds = v;
    }

    let result = fetch_on_demand(&state.ctx, &req).await?;
    Ok(Json(result_to_response(result)))
}

async fn preview_delivery(
    State(state): State<AppState>,
    Json(body): Json<DeliveryPreviewRequest>,
) -> Result<Json<FetchFeedResponse>, ServerError> {
    let mut req = FetchRequest::new(required_url(&body.url)?);
    req.headers = body.lookup_details.header_pairs();
    req.lookup_key = body.lookup_key.or(body.lookup_details.key);
    if let Some(v) = body.staleness_threshold_seconds {
        req.staleness_threshold_seconds = v;
    }

    let view = delivery_preview(&state.ctx, &req).await?;
    debug!(url = %req.url, status = view.request_status(), "Delivery preview");
    Ok(Json(result_to_response(OnDemandResult::Status(view))))
}

fn required_url(raw: &str) -> Result<&str, ServerError> {
    let url = raw.trim();
    if url.is_empty() {
        return Err(ServerError::new(StatusCode::BAD_REQUEST, "url is required"));
    }
    Ok(url)
}

fn listing_to_response(listing: RequestListing) -> FeedRequestsResponse {
    FeedRequestsResponse {
        result: FeedRequestsResult {
            requests: listing.requests.iter().map(summarize).collect(),
            next_retry_timestamp: listing.next_retry_at_ms.map(ms_to_unix_seconds),
            feed_host_global_rate_limit: listing.rate_limit.map(|l| HostRateLimitView {
                interval_sec: l.interval_seconds,
                request_limit: l.request_limit,
            }),
        },
    }
}

fn summarize(attempt: &FetchAttempt) -> FeedRequestSummary {
    FeedRequestSummary {
        id: attempt.id.clone(),
        url: attempt.url.clone(),
        status: attempt.status.as_str(),
        source: attempt.source.as_str(),
        created_at: ms_to_unix_seconds(attempt.created_at_ms),
        created_at_iso: epoch_ms_to_utc_iso(attempt.created_at_ms),
        next_retry_at: attempt.next_retry_at_ms.map(ms_to_unix_seconds),
        error_message: attempt.error_message.clone(),
        response: ResponseSummary {
            status_code: attempt
                .response
                .as_ref()
                .map(|r| r.status_code)
                .or(attempt.http_status),
            headers: validator_headers(attempt),
        },
    }
}

fn validator_headers(attempt: &FetchAttempt) -> BTreeMap<&'static str, String> {
    let mut headers = BTreeMap::new();
    if let Some(r) = &attempt.response {
        if let Some(etag) = &r.etag {
            headers.insert("etag", etag.clone());
        }
        if let Some(last_modified) = &r.last_modified {
            headers.insert("last-modified", last_modified.clone());
        }
    }
    headers
}

fn result_to_response(result: OnDemandResult) -> FetchFeedResponse {
    let request_status = result.request_status();
    let response = match result {
        OnDemandResult::MatchedHash => None,
        OnDemandResult::Status(view) => match view {
            FetchStatusView::Success {
                hash,
                body,
                status_code,
            } => Some(FetchedResponse {
                hash,
                body: Some(body),
                status_code,
            }),
            FetchStatusView::BadStatusCode { status_code } | FetchStatusView::ParseError { status_code } => {
                Some(FetchedResponse {
                    hash: None,
                    body: None,
                    status_code,
                })
            }
            FetchStatusView::FetchError
            | FetchStatusView::FetchTimeout
            | FetchStatusView::RefusedOversized
            | FetchStatusView::Pending => None,
        },
    };
    FetchFeedResponse {
        request_status,
        response,
    }
}

fn ms_to_unix_seconds(ms: i64) -> i64 {
    ms.div_euclid(1000)
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use feedgate_core::app::context::AppContext;
    use feedgate_core::domain::model::{
        AttemptSource, AttemptStatus, FetchAttempt, FetchResult, ResponseLocation, StoredResponse,
    };
    use feedgate_core::infra::clock::ManualClock;
    use feedgate_core::infra::config::ConfigLoader;
    use feedgate_core::infra::memory::{DiscardPublisher, MemoryCacheStore, MemoryCounterStore};
    use feedgate_core::infra::rate_limit::RateLimitGate;
    use feedgate_core::infra::response_store::ResponseTierStore;
    use feedgate_core::infra::sqlite_ledger::SqliteLedger;
    use feedgate_core::ports::http::Http;
    use feedgate_core::ports::ledger::Ledger;

    use super::*;
    use crate::app_state::ServerContext;

    // 2026-10-15T00:00:00Z
    const NOW_MS: i64 = 1_792_022_400_000;
    const FEED: &str = "https://data.sec.gov/feed.xml";
    const LIMITS: &str = r#"
[[hosts]]
host = "data.sec.gov"
request_limit = 10
interval_seconds = 2
"#;

    #[derive(Default)]
    struct FixedHttp {
        calls: AtomicUsize,
        last_headers: Mutex<Vec<(String, String)>>,
    }

    #[async_trait::async_trait]
    impl Http for FixedHttp {
        async fn fetch(&self, _url: &str) -> FetchResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            FetchResult {
                status: Some(AttemptStatus::Ok),
                status_code: Some(200),
                body: Some("<rss>hello</rss>".to_string()),
                latency_ms: 3,
                ..Default::default()
            }
        }

        async fn fetch_with_headers(&self, url: &str, headers: &[(String, String)]) -> FetchResult {
            *self.last_headers.lock().unwrap() = headers.to_vec();
            self.fetch(url).await
        }
    }

    struct TestApp {
        router: Router,
        ledger: Arc<SqliteLedger>,
        http: Arc<FixedHttp>,
    }

    async fn app(config: &str) -> TestApp {
        let cfg = ConfigLoader::parse(config, Some(LIMITS), Path::new("/tmp/feedgate/config.toml")).unwrap();
        let ledger = Arc::new(SqliteLedger::in_memory().await.unwrap());
        ledger.migrate().await.unwrap();
        let http = Arc::new(FixedHttp::default());

        let gate = RateLimitGate::new(Arc::new(MemoryCounterStore::new()), &cfg.rate_limits);
        let responses = ResponseTierStore::new(Arc::new(MemoryCacheStore::new()), None, Duration::from_secs(60));

        let ctx: ServerContext = AppContext {
            cfg: Arc::new(cfg),
            ledger: ledger.clone() as Arc<dyn Ledger>,
            http: http.clone() as Arc<dyn Http>,
            clock: Arc::new(ManualClock::at(NOW_MS)),
            gate: Arc::new(gate),
            responses: Arc::new(responses),
            events: Arc::new(DiscardPublisher),
        };

        TestApp {
            router: router(AppState::new(ctx)),
            ledger,
            http,
        }
    }

    async fn send(router: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let res = router.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_req(body: Value) -> Request<Body> {
        post_to("/v1/feed-requests", body)
    }

    fn post_to(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn failed_attempt(at_ms: i64) -> FetchAttempt {
        FetchAttempt {
            id: format!("att-{at_ms}"),
            url: FEED.to_string(),
            lookup_key: FEED.to_string(),
            status: AttemptStatus::FetchTimeout,
            source: AttemptSource::Scheduled,
            created_at_ms: at_ms,
            next_retry_at_ms: Some(at_ms + 300_000),
            error_message: Some("timed out".to_string()),
            http_status: None,
            response: None,
        }
    }

    #[tokio::test]
    async fn health_answers_ok() {
        let t = app("").await;
        let res = t.router.clone().oneshot(get_req("/health")).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn listing_without_target_is_bad_request() {
        let t = app("").await;
        let (status, body) = send(&t.router, get_req("/v1/feed-requests")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "bad_request");
    }

    #[tokio::test]
    async fn listing_reports_retry_and_host_limit() {
        let t = app("").await;
        t.ledger.insert_attempts(&[failed_attempt(NOW_MS - 60_000)]).await.unwrap();

        let uri = format!("/v1/feed-requests?url={FEED}");
        let (status, body) = send(&t.router, get_req(&uri)).await;

        assert_eq!(status, StatusCode::OK);
        let result = &body["result"];
        assert_eq!(result["requests"].as_array().map(Vec::len), Some(1));
        assert_eq!(result["requests"][0]["status"], "fetch_timeout");
        assert_eq!(result["requests"][0]["createdAt"], json!((NOW_MS - 60_000) / 1000));
        assert_eq!(result["nextRetryTimestamp"], json!((NOW_MS + 240_000) / 1000));
        assert_eq!(result["feedHostGlobalRateLimit"]["intervalSec"], 2);
        assert_eq!(result["feedHostGlobalRateLimit"]["requestLimit"], 10);
    }

    #[tokio::test]
    async fn post_fetches_and_returns_body() {
        let t = app("").await;
        let (status, body) = send(&t.router, post_req(json!({ "url": FEED }))).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["requestStatus"], "SUCCESS");
        assert_eq!(body["response"]["body"], "<rss>hello</rss>");
        assert_eq!(body["response"]["statusCode"], 200);
        assert_eq!(t.http.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn post_without_fetch_permission_is_pending() {
        let t = app("").await;
        let (status, body) = send(
            &t.router,
            post_req(json!({ "url": FEED, "executeFetchIfNotExists": false })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["requestStatus"], "PENDING");
        assert!(body.get("response").is_none());
        assert_eq!(t.http.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn post_with_blank_url_is_rejected() {
        let t = app("").await;
        let (status, body) = send(&t.router, post_req(json!({ "url": "  " }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["message"], "url is required");
    }

    #[tokio::test]
    async fn listing_exposes_stored_validators() {
        let t = app("").await;
        let mut ok = failed_attempt(NOW_MS - 60_000);
        ok.status = AttemptStatus::Ok;
        ok.next_retry_at_ms = None;
        ok.error_message = None;
        ok.response = Some(StoredResponse {
            id: "resp-1".to_string(),
            status_code: 200,
            text_hash: "abc".to_string(),
            is_from_known_cdn: false,
            etag: Some("\"v7\"".to_string()),
            last_modified: Some("Wed, 14 Oct 2026 23:00:00 GMT".to_string()),
            location: ResponseLocation::Blob {
                key: "blob-1".to_string(),
            },
            created_at_ms: NOW_MS - 60_000,
        });
        t.ledger.insert_attempts(&[ok]).await.unwrap();

        let (status, body) = send(&t.router, get_req(&format!("/v1/feed-requests?url={FEED}"))).await;

        assert_eq!(status, StatusCode::OK);
        let response = &body["result"]["requests"][0]["response"];
        assert_eq!(response["statusCode"], 200);
        assert_eq!(response["headers"]["etag"], "\"v7\"");
        assert_eq!(response["headers"]["last-modified"], "Wed, 14 Oct 2026 23:00:00 GMT");
    }

    #[tokio::test]
    async fn post_forwards_lookup_headers() {
        let t = app("").await;
        let (status, body) = send(
            &t.router,
            post_req(json!({
                "url": FEED,
                "executeFetch": true,
                "lookupDetails": { "key": "sec-feed", "headers": { "authorization": "Bearer t0k" } },
            })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["requestStatus"], "SUCCESS");
        assert_eq!(
            *t.http.last_headers.lock().unwrap(),
            vec![("authorization".to_string(), "Bearer t0k".to_string())]
        );
        assert!(t.ledger.latest_attempt("sec-feed").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn delivery_preview_refreshes_stale_failure() {
        let t = app("").await;
        t.ledger.insert_attempts(&[failed_attempt(NOW_MS - 3_600_000)]).await.unwrap();

        let (status, body) = send(
            &t.router,
            post_to("/v1/feed-requests/delivery-preview", json!({ "url": FEED })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["requestStatus"], "SUCCESS");
        assert_eq!(body["response"]["body"], "<rss>hello</rss>");
        assert_eq!(t.http.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn delivery_preview_serves_fresh_failure() {
        let t = app("").await;
        t.ledger.insert_attempts(&[failed_attempt(NOW_MS - 60_000)]).await.unwrap();

        let (status, body) = send(
            &t.router,
            post_to(
                "/v1/feed-requests/delivery-preview",
                json!({ "url": FEED, "stalenessThresholdSeconds": 600 }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["requestStatus"], "FETCH_TIMEOUT");
        assert!(body.get("response").is_none());
        assert_eq!(t.http.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn api_key_guards_feed_requests_only() {
        let t = app("[server]\napi_key = \"s3cret\"\n").await;

        let (status, body) = send(&t.router, get_req(&format!("/v1/feed-requests?url={FEED}"))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "unauthorized");

        let authed = Request::builder()
            .uri(format!("/v1/feed-requests?url={FEED}"))
            .header("api-key", "s3cret")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&t.router, authed).await;
        assert_eq!(status, StatusCode::OK);

        let res = t.router.clone().oneshot(get_req("/health")).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }
}
