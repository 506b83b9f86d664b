//! Outbound events for the
//! feed-management collaborator. Each
//! event is published with its name as
//! the routing key and a `{ "data": ...
//! }` body.
use serde::Serialize;

pub const FETCH_COMPLETED: &str = "fetch.completed";
pub const URL_FAILING: &str = "url.failing";
pub const URL_FAILED_DISABLE: &str = "url.failed.disable";
pub const URL_REJECTED_DISABLE: &str = "url.rejected.disable";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
  FetchCompleted {
    lookup_key: String,
    url: String,
    rate_seconds: u64,
  },
  UrlFailing {
    lookup_key: String,
    url: String,
  },
  UrlFailedDisable {
    lookup_key: String,
    url: String,
  },
  UrlRejectedDisable {
    lookup_key: String,
    url: String,
  },
}

#[derive(Serialize)]
struct Envelope<T> {
  data: T,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CompletedData<'a> {
  lookup_key: &'a str,
  url: &'a str,
  rate_seconds: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UrlData<'a> {
  lookup_key: &'a str,
  url: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RejectedData<'a> {
  lookup_key: &'a str,
  url: &'a str,
  status: &'static str,
}

impl FeedEvent {
  pub fn name(&self) -> &'static str {
    match self {
      | FeedEvent::FetchCompleted { .. } => FETCH_COMPLETED,
      | FeedEvent::UrlFailing { .. } => URL_FAILING,
      | FeedEvent::UrlFailedDisable { .. } => URL_FAILED_DISABLE,
      | FeedEvent::UrlRejectedDisable { .. } => URL_REJECTED_DISABLE,
    }
  }

  pub fn lookup_key(&self) -> &str {
    match self {
      | FeedEvent::FetchCompleted { lookup_key, .. }
      | FeedEvent::UrlFailing { lookup_key, .. }
      | FeedEvent::UrlFailedDisable { lookup_key, .. }
      | FeedEvent::UrlRejectedDisable { lookup_key, .. } => lookup_key,
    }
  }

  pub fn url(&self) -> &str {
    match self {
      | FeedEvent::FetchCompleted { url, .. }
      | FeedEvent::UrlFailing { url, .. }
      | FeedEvent::UrlFailedDisable { url, .. }
      | FeedEvent::UrlRejectedDisable { url, .. } => url,
    }
  }

  pub fn to_json(
    &self
  ) -> Result<Vec<u8>, serde_json::Error> {
    match self {
      | FeedEvent::FetchCompleted {
        lookup_key,
        url,
        rate_seconds,
      } => serde_json::to_vec(&Envelope {
        data: CompletedData {
          lookup_key,
          url,
          rate_seconds: *rate_seconds,
        },
      }),
      | FeedEvent::UrlFailing { lookup_key, url }
      | FeedEvent::UrlFailedDisable { lookup_key, url } => serde_json::to_vec(&Envelope {
        data: UrlData { lookup_key, url },
      }),
      | FeedEvent::UrlRejectedDisable { lookup_key, url } => serde_json::to_vec(&Envelope {
        data: RejectedData {
          lookup_key,
          url,
          status: "oversized",
        },
      }),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn rejected_event_carries_oversized_status() {
    let evt = FeedEvent::UrlRejectedDisable {
      lookup_key: "k".into(),
      url: "https://a.test/feed".into(),
    };
    let body: serde_json::Value =
      serde_json::from_slice(&evt.to_json().unwrap()).unwrap();
    assert_eq!(evt.name(), "url.rejected.disable");
    assert_eq!(body["data"]["status"], "oversized");
    assert_eq!(body["data"]["lookupKey"], "k");
    assert_eq!(body["data"]["url"], "https://a.test/feed");
  }

  #[test]
  fn completed_event_echoes_rate() {
    let evt = FeedEvent::FetchCompleted {
      lookup_key: "k".into(),
      url: "u".into(),
      rate_seconds: 600,
    };
    let body: serde_json::Value =
      serde_json::from_slice(&evt.to_json().unwrap()).unwrap();
    assert_eq!(body["data"]["rateSeconds"], 600);
  }
}
