//! Inbound queue messages and the batch
//! request they normalize into.
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MessageError {
  #[error("malformed json: {0}")]
  Json(#[from] serde_json::Error),
  #[error("message is missing {0}")]
  Missing(&'static str),
}

/// One URL to consider for fetching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchItem {
  pub url: String,
  pub lookup_key: String,
  pub save_to_object_storage: bool,
}

impl BatchItem {
  pub fn new(
    url: impl Into<String>,
    lookup_key: Option<String>
  ) -> Self {
    let url = url.into();
    let lookup_key = lookup_key
      .filter(|k| !k.trim().is_empty())
      .unwrap_or_else(|| url.clone());
    Self {
      url,
      lookup_key,
      save_to_object_storage: false,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRequest {
  /// When the producer enqueued the
  /// message, epoch ms.
  pub enqueued_at_ms: Option<i64>,
  pub rate_seconds: u64,
  pub items: Vec<BatchItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBatchMessage {
  timestamp: Option<i64>,
  rate_seconds: Option<u64>,
  data: Option<Vec<RawBatchItem>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBatchItem {
  url: String,
  lookup_key: Option<String>,
  #[serde(default)]
  save_to_object_storage: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSingleFetch {
  url: Option<String>,
  rate_seconds: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawSingleMessage {
  Wrapped { data: RawSingleFetch },
  Bare(RawSingleFetch),
}

/// `{ timestamp?, rateSeconds, data: [{
/// url, lookupKey?,
/// saveToObjectStorage? }] }`
pub fn parse_batch_message(
  body: &[u8]
) -> Result<BatchRequest, MessageError> {
  let raw: RawBatchMessage =
    serde_json::from_slice(body)?;
  let data =
    raw.data.ok_or(MessageError::Missing("data"))?;
  let rate_seconds =
    raw.rate_seconds.ok_or(MessageError::Missing("rateSeconds"))?;
  let items = data
    .into_iter()
    .map(|item| BatchItem {
      save_to_object_storage: item.save_to_object_storage,
      ..BatchItem::new(item.url, item.lookup_key)
    })
    .collect();
  Ok(BatchRequest {
    enqueued_at_ms: raw.timestamp,
    rate_seconds,
    items,
  })
}

/// `{ data: { url, rateSeconds } }` or
/// `{ url, rateSeconds }`, handled as a
/// batch of one keyed by its URL.
pub fn parse_single_message(
  body: &[u8]
) -> Result<BatchRequest, MessageError> {
  let raw: RawSingleMessage =
    serde_json::from_slice(body)?;
  let fetch = match raw {
    | RawSingleMessage::Wrapped { data } => data,
    | RawSingleMessage::Bare(fetch) => fetch,
  };
  let url = fetch
    .url
    .filter(|u| !u.trim().is_empty())
    .ok_or(MessageError::Missing("url"))?;
  let rate_seconds =
    fetch.rate_seconds.ok_or(MessageError::Missing("rateSeconds"))?;
  Ok(BatchRequest {
    enqueued_at_ms: None,
    rate_seconds,
    items: vec![BatchItem::new(url, None)],
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn batch_defaults_lookup_key_to_url() {
    let req = parse_batch_message(
      br#"{"timestamp":5,"rateSeconds":600,"data":[
        {"url":"https://a.test/rss"},
        {"url":"https://b.test/rss","lookupKey":"b-key","saveToObjectStorage":true}
      ]}"#,
    )
    .unwrap();
    assert_eq!(req.enqueued_at_ms, Some(5));
    assert_eq!(req.items[0].lookup_key, "https://a.test/rss");
    assert_eq!(req.items[1].lookup_key, "b-key");
    assert!(req.items[1].save_to_object_storage);
  }

  #[test]
  fn batch_without_rate_is_rejected() {
    let err =
      parse_batch_message(br#"{"data":[]}"#).unwrap_err();
    assert!(matches!(err, MessageError::Missing("rateSeconds")));
  }

  #[test]
  fn single_accepts_both_shapes() {
    let wrapped =
      parse_single_message(br#"{"data":{"url":"https://a.test","rateSeconds":60}}"#).unwrap();
    let bare = parse_single_message(br#"{"url":"https://a.test","rateSeconds":60}"#).unwrap();
    assert_eq!(wrapped, bare);
    assert_eq!(bare.items.len(), 1);
  }

  #[test]
  fn single_without_url_is_rejected() {
    let err =
      parse_single_message(br#"{"data":{"rateSeconds":60}}"#).unwrap_err();
    assert!(matches!(err, MessageError::Missing("url")));
  }
}
