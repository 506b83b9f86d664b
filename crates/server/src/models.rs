use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedRequestsQuery {
    pub url: Option<String>,
    pub lookup_key: Option<String>,
    pub limit: Option<u32>,
    pub skip: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct FeedRequestsResponse {
    pub result: FeedRequestsResult,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedRequestsResult {
    pub requests: Vec<FeedRequestSummary>,
    /// Unix seconds.
    pub next_retry_timestamp: Option<i64>,
    pub feed_host_global_rate_limit: Option<HostRateLimitView>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedRequestSummary {
    pub id: String,
    pub url: String,
    pub status: &'static str,
    pub source: &'static str,
    /// Unix seconds.
    pub created_at: i64,
    pub created_at_iso: String,
    pub next_retry_at: Option<i64>,
    pub error_message: Option<String>,
    pub response: ResponseSummary,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseSummary {
    pub status_code: Option<u16>,
    /// Validators kept with the response (`etag`, `last-modified`).
    pub headers: BTreeMap<&'static str, String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostRateLimitView {
    pub interval_sec: u64,
    pub request_limit: u64,
}

#[derive(Debug, Default, Deserialize)]
pub struct LookupDetails {
    #[serde(default)]
    pub key: Option<String>,
    /// Sent with manual fetches of this feed.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl LookupDetails {
    pub fn header_pairs(&self) -> Vec<(String, String)> {
        self.headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchFeedRequest {
    pub url: String,
    pub lookup_key: Option<String>,
    /// Older clients nest the key under `lookupDetails`.
    #[serde(default)]
    pub lookup_details: LookupDetails,
    #[serde(default)]
    pub execute_fetch: bool,
    pub execute_fetch_if_not_exists: Option<bool>,
    #[serde(default)]
    pub execute_fetch_if_stale: bool,
    pub staleness_threshold_seconds: Option<u64>,
    pub hash_to_compare: Option<String>,
    #[serde(default)]
    pub save_to_object_storage: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryPreviewRequest {
    pub url: String,
    pub lookup_key: Option<String>,
    #[serde(default)]
    pub lookup_details: LookupDetails,
    pub staleness_threshold_seconds: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchFeedResponse {
    pub request_status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<FetchedResponse>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchedResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    pub status_code: Option<u16>,
}
